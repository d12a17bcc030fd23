//! Error types for the store layer.

/// Errors raised by databases and their backends.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The connection string could not be parsed or lacks a data source.
    #[error("invalid connection string '{connection_string}': {reason}")]
    InvalidConnectionString {
        connection_string: String,
        reason: String,
    },

    /// Table names are spliced into SQL and must be plain identifiers.
    #[error("invalid table name '{name}'")]
    InvalidTableName { name: String },

    /// The database was used before `initialize` was called.
    #[error("table '{table}' used before initialize()")]
    NotInitialized { table: String },

    /// The SQLite engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row could not be encoded or decoded.
    #[error("row error: {0}")]
    Row(#[from] appvirt_core::Error),

    /// A backend-specific failure.
    #[error("{backend} backend failure: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl StoreError {
    /// True for contract violations that retrying can never fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidConnectionString { .. }
                | StoreError::InvalidTableName { .. }
                | StoreError::NotInitialized { .. }
        )
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(StoreError::NotInitialized {
            table: "filesystem".to_string()
        }
        .is_fatal());
        assert!(!StoreError::Backend {
            backend: "memory",
            message: "disk full".to_string()
        }
        .is_fatal());
        assert!(!StoreError::Sqlite(rusqlite::Error::InvalidQuery).is_fatal());
    }

    #[test]
    fn display_names_the_table() {
        let e = StoreError::NotInitialized {
            table: "registry".to_string(),
        };
        assert_eq!(e.to_string(), "table 'registry' used before initialize()");
    }
}
