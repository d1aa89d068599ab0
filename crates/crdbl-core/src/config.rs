//! Replica configuration.
//!
//! Loaded from TOML; every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```toml
//! site = 7
//! dedupe = true
//! trace_ops = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::SiteId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid replica config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("site id 0 is reserved")]
    ReservedSite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicaConfig {
    /// Site id this replica authors operations under.
    pub site: SiteId,
    /// Drop appended operations the log's aggregate clock already covers.
    pub dedupe: bool,
    /// Emit a trace event for every operation replayed during a transition.
    pub trace_ops: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            site: 1,
            dedupe: true,
            trace_ops: false,
        }
    }
}

impl ReplicaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ReplicaConfig = toml::from_str(s)?;
        if config.site == 0 {
            return Err(ConfigError::ReservedSite);
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
