//! SQLite backend.

use std::path::PathBuf;

use appvirt_core::Row;
use rusqlite::{Connection, ToSql};
use tracing::{debug, info};

use crate::backend::StoreBackend;
use crate::connection_string::ConnectionString;
use crate::error::{Result, StoreError};
use crate::query::{Command, QueryBuilder};

/// A table stored in a SQLite database file, or in memory for `:memory:`.
///
/// The connection is opened lazily by `initialize`; every command runs in
/// its own transaction.
pub struct SqliteBackend {
    source: Source,
    connection: Option<Connection>,
}

enum Source {
    File(PathBuf),
    Memory,
}

impl SqliteBackend {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
            connection: None,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            source: Source::Memory,
            connection: None,
        }
    }

    pub fn from_connection_string(connection_string: &ConnectionString) -> Self {
        if connection_string.is_memory() {
            Self::in_memory()
        } else {
            Self::open(connection_string.data_source())
        }
    }

    fn connection(&mut self, table: &str) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| StoreError::NotInitialized {
                table: table.to_string(),
            })
    }
}

impl StoreBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn initialize(&mut self, queries: &QueryBuilder) -> Result<()> {
        if self.connection.is_none() {
            let connection = match &self.source {
                Source::File(path) => {
                    info!(path = %path.display(), "opening sqlite database");
                    Connection::open(path)?
                }
                Source::Memory => Connection::open_in_memory()?,
            };
            self.connection = Some(connection);
        }
        let create = queries.create_table();
        self.connection(queries.table())?.execute(&create, [])?;
        Ok(())
    }

    fn read_rows(&mut self, queries: &QueryBuilder) -> Result<Vec<Row>> {
        let select = queries.select_all();
        let connection = self.connection(queries.table())?;
        let mut statement = connection.prepare(&select)?;
        let rows = statement
            .query_map([], |r| {
                Ok(Row::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn execute(&mut self, command: &Command) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(StoreError::NotInitialized {
                table: String::from("<unknown>"),
            });
        };

        let transaction = connection.transaction()?;
        for statement in command.statements() {
            let params: Vec<(&str, &dyn ToSql)> = statement
                .parameters()
                .iter()
                .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                .collect();
            let changed = transaction.execute(statement.sql(), params.as_slice())?;
            debug!(sql = statement.sql(), changed, "executed statement");
        }
        // Dropping an uncommitted transaction rolls it back, so an early
        // return above leaves the table untouched.
        transaction.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> (SqliteBackend, QueryBuilder) {
        let queries = QueryBuilder::new("filesystem").unwrap();
        let mut backend = SqliteBackend::in_memory();
        backend.initialize(&queries).unwrap();
        (backend, queries)
    }

    #[test]
    fn insert_update_delete() {
        let (mut backend, queries) = initialized();

        let mut command = Command::new();
        command.push(queries.insert(Row::new("a", "1", "file")));
        command.push(queries.insert(Row::new("b", "2", "file")));
        command.push(queries.update(Row::new("a", "3", "directory")));
        command.push(queries.delete(Row::new("b", "", "")));
        backend.execute(&command).unwrap();

        assert_eq!(
            backend.read_rows(&queries).unwrap(),
            vec![Row::new("a", "3", "directory")]
        );
    }

    #[test]
    fn update_and_delete_of_absent_rows_are_no_ops() {
        let (mut backend, queries) = initialized();
        let mut command = Command::new();
        command.push(queries.update(Row::new("missing", "1", "file")));
        command.push(queries.delete(Row::new("missing", "", "")));
        backend.execute(&command).unwrap();
        assert!(backend.read_rows(&queries).unwrap().is_empty());
    }

    #[test]
    fn failing_statement_rolls_back_the_batch() {
        let (mut backend, queries) = initialized();
        let other = QueryBuilder::new("no_such_table").unwrap();

        let mut command = Command::new();
        command.push(queries.insert(Row::new("a", "1", "file")));
        command.push(other.insert(Row::new("b", "2", "file")));
        assert!(backend.execute(&command).is_err());

        assert!(backend.read_rows(&queries).unwrap().is_empty());
    }

    #[test]
    fn use_before_initialize_is_reported() {
        let queries = QueryBuilder::new("filesystem").unwrap();
        let mut backend = SqliteBackend::in_memory();
        assert!(matches!(
            backend.read_rows(&queries),
            Err(StoreError::NotInitialized { .. })
        ));
    }

    #[test]
    fn initialize_twice_keeps_rows() {
        let (mut backend, queries) = initialized();
        let mut command = Command::new();
        command.push(queries.insert(Row::new("a", "1", "file")));
        backend.execute(&command).unwrap();
        backend.initialize(&queries).unwrap();
        assert_eq!(backend.read_rows(&queries).unwrap().len(), 1);
    }
}
