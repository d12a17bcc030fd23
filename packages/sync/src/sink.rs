//! Destinations a bus commits its batches to.

use appvirt_core::{DatabaseAction, TableRow};
use appvirt_store::Database;
use parking_lot::Mutex;

use crate::error::Result;

/// Receives coalesced batches from a [`SynchronizationBus`].
///
/// A commit must be all-or-nothing: on `Err` the bus keeps the batch queued
/// and offers it again on the next flush.
///
/// [`SynchronizationBus`]: crate::SynchronizationBus
pub trait ActionSink<T>: Send + Sync {
    /// Persist `actions` in order and return how many were written.
    fn commit(&self, actions: &[DatabaseAction<T>]) -> Result<usize>;
}

/// Commits straight into a local [`Database`].
pub struct LocalSink<T> {
    database: Mutex<Database<T>>,
}

impl<T: TableRow> LocalSink<T> {
    /// Wrap an already initialized database.
    pub fn new(database: Database<T>) -> Self {
        Self {
            database: Mutex::new(database),
        }
    }

    /// Every item currently persisted.
    pub fn read_all(&self) -> Result<Vec<T>> {
        Ok(self.database.lock().read_all()?)
    }

    pub fn table(&self) -> String {
        self.database.lock().table().to_string()
    }
}

impl<T: TableRow> ActionSink<T> for LocalSink<T> {
    fn commit(&self, actions: &[DatabaseAction<T>]) -> Result<usize> {
        Ok(self.database.lock().apply(actions)?)
    }
}
