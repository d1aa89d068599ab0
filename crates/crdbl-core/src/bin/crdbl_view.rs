//! `crdbl-view`: materialize a JSON operation log under a filter.
//!
//! Usage:
//!   crdbl-view <ops.json> [filter.json] [--config replica.toml]
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use crdbl_core::cli::{run, CliError};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(out) => println!("{out}"),
        Err(CliError::Usage) => {
            eprintln!("{}", crdbl_core::cli::USAGE);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
