//! Core logic of the `crdbl-view` binary.
//!
//! Usage:
//!   crdbl-view <ops.json> [filter.json] [--config replica.toml]
//!
//! `ops.json` holds a JSON array of operations in log order, `filter.json`
//! a filter (all-pass when omitted). The output is the materialized clock and
//! the reference engine's snapshot of the view. `applied` lists the
//! incorporated operation ids as `site.seq`.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{ConfigError, ReplicaConfig};
use crate::context::{ReplicaContext, TransitionError};
use crate::engine::Projection;
use crate::filter::Filter;
use crate::operation::Operation;

pub const USAGE: &str = "usage: crdbl-view <ops.json> [filter.json] [--config replica.toml]";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{}", USAGE)]
    Usage,
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewArgs {
    pub ops: PathBuf,
    pub filter: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

// ── Arguments ─────────────────────────────────────────────────────────────

pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<ViewArgs, CliError> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        match arg {
            "--config" => {
                let path = iter.next().ok_or(CliError::Usage)?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(CliError::Usage),
            flag if flag.starts_with("--") => {
                return Err(CliError::UnexpectedArgument(flag.to_string()))
            }
            path => positional.push(PathBuf::from(path)),
        }
    }
    let mut positional = positional.into_iter();
    let ops = positional.next().ok_or(CliError::Usage)?;
    let filter = positional.next();
    if let Some(extra) = positional.next() {
        return Err(CliError::UnexpectedArgument(extra.display().to_string()));
    }
    Ok(ViewArgs { ops, filter, config })
}

// ── View ──────────────────────────────────────────────────────────────────

/// Materialize `ops_json` under `filter_json` and render the result.
pub fn view(ops_json: &str, filter_json: Option<&str>, config: &ReplicaConfig) -> Result<Value, CliError> {
    let ops: Vec<Operation> = serde_json::from_str(ops_json)?;
    let filter: Filter = match filter_json {
        Some(text) => serde_json::from_str(text)?,
        None => Filter::new(),
    };

    let mut ctx = ReplicaContext::with_config(Projection::new(), config);
    // start from an empty view so appends only fill the log
    ctx.transition(&Filter::nothing())?;
    for op in ops {
        ctx.append(op)?;
    }
    let report = ctx.transition(&filter)?;
    tracing::debug!(%report, "view materialized");

    let applied: Vec<String> = ctx
        .engine()
        .applied_ids()
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(json!({
        "clock": ctx.materialized_clock(),
        "applied": applied,
        "view": ctx.engine().snapshot(),
    }))
}

pub fn run<S: AsRef<str>>(args: &[S]) -> Result<String, CliError> {
    let args = parse_args(args)?;
    let config = match &args.config {
        Some(path) => ReplicaConfig::load(path)?,
        None => ReplicaConfig::default(),
    };
    let ops = read(&args.ops)?;
    let filter = args.filter.as_deref().map(read).transpose()?;
    let out = view(&ops, filter.as_deref(), &config)?;
    Ok(serde_json::to_string_pretty(&out)?)
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
