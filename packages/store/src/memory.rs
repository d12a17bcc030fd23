//! In-memory backend, shareable between a database and a test harness.

use std::collections::BTreeMap;
use std::sync::Arc;

use appvirt_core::Row;
use parking_lot::Mutex;

use crate::backend::StoreBackend;
use crate::error::{Result, StoreError};
use crate::query::{Command, Operation, QueryBuilder};

#[derive(Default)]
struct State {
    initialized: bool,
    rows: BTreeMap<String, Row>,
    executions: usize,
}

/// A table kept in a `BTreeMap`.
///
/// Clones share state, so a test can hand one clone to a [`Database`] and
/// inspect the rows through another.
///
/// [`Database`]: crate::Database
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty commands executed so far.
    pub fn executions(&self) -> usize {
        self.state.lock().executions
    }

    /// Snapshot of the table, ordered by key.
    pub fn rows(&self) -> Vec<Row> {
        self.state.lock().rows.values().cloned().collect()
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn initialize(&mut self, _queries: &QueryBuilder) -> Result<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn read_rows(&mut self, queries: &QueryBuilder) -> Result<Vec<Row>> {
        let state = self.state.lock();
        if !state.initialized {
            return Err(StoreError::NotInitialized {
                table: queries.table().to_string(),
            });
        }
        Ok(state.rows.values().cloned().collect())
    }

    fn execute(&mut self, command: &Command) -> Result<()> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(StoreError::Backend {
                backend: "memory",
                message: "execute before initialize".to_string(),
            });
        }

        // Apply to a copy and swap, so the batch is all-or-nothing.
        let mut rows = state.rows.clone();
        for statement in command.statements() {
            let row = statement.row();
            match statement.operation() {
                Operation::Insert => {
                    rows.insert(row.key.clone(), row.clone());
                }
                Operation::Update => {
                    if let Some(existing) = rows.get_mut(&row.key) {
                        *existing = row.clone();
                    }
                }
                Operation::Delete => {
                    rows.remove(&row.key);
                }
            }
        }
        state.rows = rows;
        if !command.is_empty() {
            state.executions += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_rows() {
        let queries = QueryBuilder::new("t").unwrap();
        let observer = MemoryBackend::new();
        let mut backend = observer.clone();
        backend.initialize(&queries).unwrap();

        let mut command = Command::new();
        command.push(queries.insert(Row::new("b", "2", "file")));
        command.push(queries.insert(Row::new("a", "1", "file")));
        command.push(queries.update(Row::new("zz", "9", "file")));
        backend.execute(&command).unwrap();

        let keys: Vec<String> = observer.rows().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(observer.executions(), 1);
    }

    #[test]
    fn read_before_initialize_fails() {
        let queries = QueryBuilder::new("t").unwrap();
        let mut backend = MemoryBackend::new();
        assert!(matches!(
            backend.read_rows(&queries),
            Err(StoreError::NotInitialized { .. })
        ));
    }
}
