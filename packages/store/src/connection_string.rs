//! Connection strings of the form `Data Source=path;Table=name`.

use crate::error::{Result, StoreError};

/// In-memory SQLite data source.
pub const MEMORY_DATA_SOURCE: &str = ":memory:";

/// A parsed connection string.
///
/// Recognized keys (case-insensitive): `Data Source` (required), `Table`
/// and `Version` (accepted for compatibility, must be `3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    data_source: String,
    table: Option<String>,
}

impl ConnectionString {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let invalid = |reason: String| StoreError::InvalidConnectionString {
            connection_string: connection_string.to_string(),
            reason,
        };

        let mut data_source = None;
        let mut table = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, found '{}'", part)))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "data source" | "datasource" => data_source = Some(value.to_string()),
                "table" => table = Some(value.to_string()),
                "version" if value == "3" => {}
                "version" => return Err(invalid(format!("unsupported version '{}'", value))),
                other => return Err(invalid(format!("unknown key '{}'", other))),
            }
        }

        match data_source {
            Some(data_source) if !data_source.is_empty() => Ok(Self { data_source, table }),
            _ => Err(invalid("missing Data Source".to_string())),
        }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn is_memory(&self) -> bool {
        self.data_source == MEMORY_DATA_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_source_and_table() {
        let cs = ConnectionString::parse("Data Source=C:\\env\\fs.db; Table=files;").unwrap();
        assert_eq!(cs.data_source(), "C:\\env\\fs.db");
        assert_eq!(cs.table(), Some("files"));
        assert!(!cs.is_memory());
    }

    #[test]
    fn keys_are_case_insensitive() {
        let cs = ConnectionString::parse("data source=:memory:;VERSION=3").unwrap();
        assert!(cs.is_memory());
        assert_eq!(cs.table(), None);
    }

    #[test]
    fn rejects_missing_data_source() {
        for input in ["", "Table=x", "Data Source=  "] {
            assert!(
                matches!(
                    ConnectionString::parse(input),
                    Err(StoreError::InvalidConnectionString { .. })
                ),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(ConnectionString::parse("Data Source=a;Pooling").is_err());
        assert!(ConnectionString::parse("Data Source=a;Password=x").is_err());
        assert!(ConnectionString::parse("Data Source=a;Version=2").is_err());
    }
}
