use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SqlCommandError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Provider resolution failed. The outer message is for humans, the cause is kept.
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        #[source]
        source: ConfigError,
    },

    #[error("Argument error: {0}")]
    ArgumentError(String),

    #[error(
        "Parameter count does not match parameter value count (expected {expected}, got {actual})"
    )]
    ArgumentMismatch { expected: usize, actual: usize },

    #[error("Null argument: {0}")]
    NullArgument(&'static str),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Coarse classification of a [`SqlCommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Argument,
    InvalidState,
    Execution,
    Unsupported,
}

impl SqlCommandError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError { .. } => ErrorKind::Configuration,
            Self::ArgumentError(_) | Self::ArgumentMismatch { .. } | Self::NullArgument(_) => {
                ErrorKind::Argument
            }
            Self::InvalidTransaction(_) | Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::ExecutionError(_) => ErrorKind::Execution,
            #[cfg(feature = "postgres")]
            Self::PostgresError(_) => ErrorKind::Execution,
            #[cfg(feature = "sqlite")]
            Self::SqliteError(_) => ErrorKind::Execution,
        }
    }

    pub(crate) fn config(message: impl Into<String>, source: ConfigError) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }
}

pub type Result<T, E = SqlCommandError> = std::result::Result<T, E>;
