//! Guest-side adapters that push bus batches and reports to the host.

use std::collections::VecDeque;
use std::sync::Arc;

use appvirt_core::{
    DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, ReportSink,
};
use appvirt_sync::{ActionSink, SyncError};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ConnectionError, Result};
use crate::roles::{Reporter, Synchronizer};

/// Reports kept while the host cannot be reached. Oldest go first.
pub const MAX_BUFFERED_REPORTS: usize = 256;

/// An [`ActionSink`] that commits by calling the host's [`Synchronizer`].
pub struct SynchronizerSink<S: ?Sized> {
    host: Arc<S>,
}

impl<S: Synchronizer + ?Sized> SynchronizerSink<S> {
    pub fn new(host: Arc<S>) -> Self {
        Self { host }
    }
}

fn to_sync(e: ConnectionError) -> SyncError {
    SyncError::remote(e.to_string())
}

impl<S: Synchronizer + ?Sized> ActionSink<FileTableEntry> for SynchronizerSink<S> {
    fn commit(&self, actions: &[DatabaseAction<FileTableEntry>]) -> appvirt_sync::Result<usize> {
        self.host
            .sync_file_system_actions(actions.to_vec())
            .map_err(to_sync)
    }
}

impl<S: Synchronizer + ?Sized> ActionSink<RegistryItem> for SynchronizerSink<S> {
    fn commit(&self, actions: &[DatabaseAction<RegistryItem>]) -> appvirt_sync::Result<usize> {
        self.host.sync_registry_actions(actions.to_vec()).map_err(to_sync)
    }
}

/// A [`ReportSink`] that forwards messages at or above the host's required
/// level, keeping them while the host is unreachable.
pub struct ForwardingReportSink<R: ?Sized> {
    host: Arc<R>,
    level: LogLevel,
    buffer: Mutex<VecDeque<LogMessage>>,
    sending: Mutex<()>,
}

impl<R: Reporter + ?Sized> ForwardingReportSink<R> {
    pub fn new(host: Arc<R>, level: LogLevel) -> Self {
        Self {
            host,
            level,
            buffer: Mutex::new(VecDeque::new()),
            sending: Mutex::new(()),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Reports waiting to be delivered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Deliver every buffered report in one batch.
    pub fn flush(&self) -> Result<usize> {
        let _sending = self.sending.lock();
        let batch: Vec<_> = self.buffer.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        if let Err(e) = self.host.report_messages(batch.clone()) {
            let mut buffer = self.buffer.lock();
            for message in batch.into_iter().rev() {
                buffer.push_front(message);
            }
            while buffer.len() > MAX_BUFFERED_REPORTS {
                buffer.pop_front();
            }
            return Err(e);
        }
        Ok(count)
    }
}

impl<R: Reporter + ?Sized> ReportSink for ForwardingReportSink<R> {
    fn report(&self, message: LogMessage) {
        if message.level < self.level {
            return;
        }
        {
            let mut buffer = self.buffer.lock();
            buffer.push_back(message);
            while buffer.len() > MAX_BUFFERED_REPORTS {
                buffer.pop_front();
            }
        }
        if let Err(e) = self.flush() {
            debug!(error = %e, buffered = self.buffered(), "report kept for later");
        }
    }
}
