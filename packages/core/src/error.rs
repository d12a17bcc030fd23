//! Error types for the core layer.

use std::path::PathBuf;

/// Errors raised while building core values from untrusted input.
///
/// All of these surface at startup (configuration, rule sets) or while
/// decoding persisted rows; none of them occur on the intercepted-call path.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A rule pattern uses the `%` wildcard somewhere other than its ends,
    /// or has no literal part at all.
    #[error("invalid rule pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A persisted row could not be turned back into an item.
    #[error("malformed {table} row '{key}': {message}")]
    MalformedRow {
        table: &'static str,
        key: String,
        message: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The configuration file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_display() {
        let e = Error::InvalidPattern {
            pattern: "a%b".to_string(),
            reason: "wildcard in the middle".to_string(),
        };
        let display = e.to_string();
        assert!(display.contains("a%b"));
        assert!(display.contains("wildcard in the middle"));
    }

    #[test]
    fn malformed_row_display() {
        let e = Error::MalformedRow {
            table: "filesystem",
            key: "c:\\temp".to_string(),
            message: "unknown kind".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "malformed filesystem row 'c:\\temp': unknown kind"
        );
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let e: Error = json_err.into();
        assert!(matches!(e, Error::Json(_)));
    }
}
