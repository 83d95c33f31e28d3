//! Error types for checkpoint state reads.
//!
//! Every variant except [`StateError::Io`] and [`StateError::Decode`] is raised
//! while a query is being resolved or opened, before any partition data is
//! read. A query that fails validation therefore never emits a row.

use thiserror::Error;

/// The error type for all state-reader operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Malformed or missing option, negative id, empty name, unknown enum value.
    #[error("invalid option `{option}`: {message}")]
    InvalidOption { option: &'static str, message: String },

    /// Two mutually exclusive options were both supplied.
    #[error("conflicting options `{first}` and `{second}` cannot be used together")]
    ConflictingOption {
        first: &'static str,
        second: &'static str,
    },

    /// Missing logs, no committed batch, unknown operator directory.
    #[error("invalid checkpoint at {path}: {message}")]
    InvalidCheckpoint { path: String, message: String },

    /// A schema descriptor could not be read or parsed.
    #[error("corrupt state schema at {path}: {message}")]
    CorruptSchema { path: String, message: String },

    /// The relation was consumed as an unbounded stream.
    #[error("unsupported mode: {message}")]
    UnsupportedMode { message: String },

    /// Raw state bytes did not match the loaded schema.
    #[error("failed to decode state row: {message}")]
    Decode { message: String },

    /// Storage failure, surfaced unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    pub(crate) fn invalid_option(option: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_checkpoint(
        path: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidCheckpoint {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn corrupt_schema(
        path: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        Self::CorruptSchema {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Stable, machine-readable name of the error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidOption { .. } => "InvalidOption",
            Self::ConflictingOption { .. } => "ConflictingOption",
            Self::InvalidCheckpoint { .. } => "InvalidCheckpoint",
            Self::CorruptSchema { .. } => "CorruptSchema",
            Self::UnsupportedMode { .. } => "UnsupportedMode",
            Self::Decode { .. } => "Decode",
            Self::Io(_) => "Io",
        }
    }
}
