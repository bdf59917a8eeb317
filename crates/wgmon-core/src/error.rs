// Error types for the WireGuard monitor

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command `{name}` failed ({status}): {stderr}")]
    Command {
        name: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of a single reachability probe.
///
/// Callers branch on the kind, never on message text. `Cancelled` is not a
/// real failure: a cancelled probe produced no result and must not be
/// reported as success or failure.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe cancelled")]
    Cancelled,

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// The tool ran to completion but produced no parsable latency.
    #[error("target unreachable: {diagnostic}")]
    Unreachable { diagnostic: String },

    #[error("probe IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// True when the probe was superseded rather than genuinely failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled)
    }
}
