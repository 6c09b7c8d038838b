//! CLI command implementations.

pub mod apply;
pub mod inspect_schema;

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The store rejected the input.
    #[error(transparent)]
    Core(#[from] configstore_core::CoreError),

    /// Output could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported `--format` value.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty JSON.
    Json,
}

impl std::str::FromStr for Format {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}
