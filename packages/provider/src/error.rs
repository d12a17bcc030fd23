//! Error types for the resource providers.

use std::io;

/// Errors raised while redirecting a resource.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    /// The guest lost its host connection; redirection fails closed.
    #[error("not connected to the host, refusing to redirect")]
    Disconnected,

    /// No free virtual identifier was found within the attempt budget.
    #[error("no free virtual name for '{identifier}' after {attempts} attempts")]
    NameExhausted { identifier: String, attempts: usize },

    /// A file system operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid registry key handle {handle}")]
    InvalidHandle { handle: u64 },

    #[error("registry key '{path}' not found")]
    KeyNotFound { path: String },

    #[error("registry value '{name}' not found under '{key}'")]
    ValueNotFound { key: String, name: String },

    /// The real registry rejected an operation.
    #[error("registry error on '{path}': {message}")]
    Registry { path: String, message: String },
}

impl ProviderError {
    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        ProviderError::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
