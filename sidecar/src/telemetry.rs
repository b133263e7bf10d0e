//! Structured logging for embedders of the sidecar.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Install a global subscriber writing JSON logs at `level` and above.
///
/// `RUST_LOG` directives take precedence over `level` when set.
pub fn init(level: Level) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .json()
        .with_line_number(true)
        .with_file(true)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| Error::Install(err.to_string()))
}
