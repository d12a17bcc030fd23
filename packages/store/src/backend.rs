//! The swappable engine behind a [`Database`](crate::Database).

use appvirt_core::Row;

use crate::error::Result;
use crate::query::{Command, QueryBuilder};

/// A storage engine holding one `(key, value, kind)` table.
///
/// The only hard requirement on an engine is that [`execute`] is atomic:
/// either every statement of the command is applied or none is.
///
/// [`execute`]: StoreBackend::execute
pub trait StoreBackend: Send {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Open the engine and create the table if needed. Called once per
    /// database before any other method.
    fn initialize(&mut self, queries: &QueryBuilder) -> Result<()>;

    /// Every row of the table.
    fn read_rows(&mut self, queries: &QueryBuilder) -> Result<Vec<Row>>;

    /// Apply a batch atomically.
    fn execute(&mut self, command: &Command) -> Result<()>;
}

impl<B: StoreBackend + ?Sized> StoreBackend for Box<B> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn initialize(&mut self, queries: &QueryBuilder) -> Result<()> {
        self.as_mut().initialize(queries)
    }

    fn read_rows(&mut self, queries: &QueryBuilder) -> Result<Vec<Row>> {
        self.as_mut().read_rows(queries)
    }

    fn execute(&mut self, command: &Command) -> Result<()> {
        self.as_mut().execute(command)
    }
}
