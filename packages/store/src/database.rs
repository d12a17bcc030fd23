//! Typed tables over a [`StoreBackend`].

use std::marker::PhantomData;

use appvirt_core::{DatabaseAction, TableRow};
use tracing::{debug, error, info};

use crate::backend::StoreBackend;
use crate::connection_string::ConnectionString;
use crate::error::{Result, StoreError};
use crate::memory::MemoryBackend;
use crate::query::{Command, QueryBuilder};
use crate::sqlite::SqliteBackend;

/// One persisted table of `T` items.
///
/// Mutations are staged with [`enqueue_action`](Self::enqueue_action) and
/// written by [`commit`](Self::commit) as a single atomic command.
///
/// ```
/// use appvirt_core::{DatabaseAction, FileTableEntry, ResourceKind};
/// use appvirt_store::Database;
///
/// let mut db = Database::<FileTableEntry>::in_memory().unwrap();
/// db.initialize().unwrap();
/// db.apply(&[DatabaseAction::set(FileTableEntry::new(
///     "c:\\temp\\a.txt",
///     "c:\\appvirt\\a.txt",
///     ResourceKind::File,
/// ))])
/// .unwrap();
/// assert_eq!(db.read_all().unwrap().len(), 1);
/// ```
pub struct Database<T> {
    backend: Box<dyn StoreBackend>,
    queries: QueryBuilder,
    initialized: bool,
    pending: Command,
    _items: PhantomData<fn() -> T>,
}

impl<T: TableRow> Database<T> {
    /// A database over `backend` using the item type's default table.
    pub fn new(backend: impl StoreBackend + 'static) -> Result<Self> {
        Self::with_table(backend, T::TABLE)
    }

    pub fn with_table(backend: impl StoreBackend + 'static, table: &str) -> Result<Self> {
        Ok(Self {
            backend: Box::new(backend),
            queries: QueryBuilder::new(table)?,
            initialized: false,
            pending: Command::new(),
            _items: PhantomData,
        })
    }

    /// A SQLite database described by a connection string such as
    /// `Data Source=filesystem.db;Table=filesystem`.
    pub fn open(connection_string: &str) -> Result<Self> {
        let parsed = ConnectionString::parse(connection_string)?;
        let table = parsed.table().unwrap_or(T::TABLE).to_string();
        Self::with_table(SqliteBackend::from_connection_string(&parsed), &table)
    }

    /// A database over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Result<Self> {
        Self::new(MemoryBackend::new())
    }

    pub fn table(&self) -> &str {
        self.queries.table()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Open the backend and create the table. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.backend.initialize(&self.queries)?;
        self.initialized = true;
        info!(
            table = self.table(),
            backend = self.backend.name(),
            "database initialized"
        );
        Ok(())
    }

    /// Every item in the table.
    pub fn read_all(&mut self) -> Result<Vec<T>> {
        self.ensure_initialized()?;
        let rows = self.backend.read_rows(&self.queries)?;
        let items = rows
            .into_iter()
            .map(|row| T::from_row(row).map_err(StoreError::from))
            .collect::<Result<Vec<T>>>()?;
        debug!(table = self.table(), rows = items.len(), "read table");
        Ok(items)
    }

    /// Stage one action for the next commit.
    pub fn enqueue_action(&mut self, action: &DatabaseAction<T>) -> Result<()> {
        self.ensure_initialized()?;
        let statement = self.queries.for_action(action)?;
        self.pending.push(statement);
        Ok(())
    }

    /// Stage several actions, in order.
    pub fn enqueue_actions<'a>(
        &mut self,
        actions: impl IntoIterator<Item = &'a DatabaseAction<T>>,
    ) -> Result<()> {
        for action in actions {
            self.enqueue_action(action)?;
        }
        Ok(())
    }

    /// Number of statements staged for the next commit.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write every staged statement as one atomic command and return how
    /// many were written.
    ///
    /// With nothing staged this performs no I/O. On failure the staged
    /// statements are discarded and the table is unchanged.
    pub fn commit(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        let command = std::mem::take(&mut self.pending);
        if command.is_empty() {
            return Ok(0);
        }
        self.backend.execute(&command)?;
        debug!(
            table = self.table(),
            statements = command.len(),
            "committed command"
        );
        Ok(command.len())
    }

    /// Stage `actions` and commit them together.
    pub fn apply(&mut self, actions: &[DatabaseAction<T>]) -> Result<usize> {
        if let Err(e) = self.enqueue_actions(actions) {
            self.pending = Command::new();
            return Err(e);
        }
        self.commit()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        error!(table = self.table(), "database used before initialize");
        Err(StoreError::NotInitialized {
            table: self.table().to_string(),
        })
    }
}
