//! Error types for the synchronization bus.

use appvirt_store::StoreError;

/// Errors raised while committing queued actions.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The local store rejected the batch.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A remote synchronizer could not be reached or rejected the batch.
    #[error("remote synchronizer error: {message}")]
    Remote { message: String },

    /// A non-retryable failure. The bus stops flushing once it sees one.
    #[error("fatal synchronization error: {message}")]
    Fatal { message: String },

    /// The auto-flush worker thread could not be started.
    #[error("failed to start auto-flush worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl SyncError {
    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
        }
    }

    /// True when retrying the same batch can never succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_fatal(),
            SyncError::Fatal { .. } => true,
            SyncError::Remote { .. } | SyncError::Spawn(_) => false,
        }
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_fatality_carries_over() {
        let fatal = SyncError::from(StoreError::NotInitialized {
            table: "filesystem".to_string(),
        });
        assert!(fatal.is_fatal());

        let transient = SyncError::from(StoreError::Backend {
            backend: "memory",
            message: "busy".to_string(),
        });
        assert!(!transient.is_fatal());
        assert!(!SyncError::remote("pipe closed").is_fatal());
    }
}
