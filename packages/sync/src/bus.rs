//! The synchronization bus: an ordered queue of database actions that is
//! flushed to a sink in batches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use appvirt_core::{DatabaseAction, LogLevel, LogMessage, ReportSink, TableRow};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::auto_flush::FlushWorker;
use crate::coalesce::coalesce;
use crate::error::{Result, SyncError};
use crate::sink::ActionSink;

/// Consecutive failed flushes after which failures are reported as
/// [`LogLevel::Critical`].
pub const ESCALATION_THRESHOLD: u32 = 3;

/// Outcome of a successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Queued actions taken by the flush.
    pub actions: usize,
    /// Actions committed to the sink after coalescing.
    pub committed: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.actions == 0
    }
}

struct Inner<T> {
    name: String,
    queue: Mutex<VecDeque<DatabaseAction<T>>>,
    flush_lock: Mutex<()>,
    sink: Arc<dyn ActionSink<T>>,
    reporter: Arc<dyn ReportSink>,
    consecutive_failures: AtomicU32,
    disabled: AtomicBool,
}

/// Queues actions from any number of producers and commits them to one
/// sink, preserving per-key order.
///
/// `enqueue` only touches the queue lock, so producers never wait on a
/// flush in progress. Flushes are serialized. A failed flush leaves the
/// queue as it was; the same actions are offered again on the next flush.
///
/// ```
/// use std::sync::Arc;
/// use appvirt_core::{DatabaseAction, FileTableEntry, ResourceKind, TracingReportSink};
/// use appvirt_store::Database;
/// use appvirt_sync::{LocalSink, SynchronizationBus};
///
/// let mut database = Database::<FileTableEntry>::in_memory().unwrap();
/// database.initialize().unwrap();
/// let sink = Arc::new(LocalSink::new(database));
/// let bus: SynchronizationBus<FileTableEntry> = SynchronizationBus::new("filesystem", sink.clone(), Arc::new(TracingReportSink));
///
/// bus.enqueue(DatabaseAction::set(FileTableEntry::new("c:\\a", "c:\\v\\a", ResourceKind::File)));
/// assert_eq!(bus.flush().unwrap().committed, 1);
/// assert_eq!(sink.read_all().unwrap().len(), 1);
/// ```
pub struct SynchronizationBus<T> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<FlushWorker>>,
}

impl<T: TableRow> SynchronizationBus<T> {
    pub fn new(
        name: impl Into<String>,
        sink: Arc<dyn ActionSink<T>>,
        reporter: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                queue: Mutex::new(VecDeque::new()),
                flush_lock: Mutex::new(()),
                sink,
                reporter,
                consecutive_failures: AtomicU32::new(0),
                disabled: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue an action for the next flush.
    pub fn enqueue(&self, action: DatabaseAction<T>) {
        self.inner.queue.lock().push_back(action);
    }

    /// Queue several actions, keeping their order.
    pub fn enqueue_all(&self, actions: impl IntoIterator<Item = DatabaseAction<T>>) {
        self.inner.queue.lock().extend(actions);
    }

    /// Number of actions waiting for a flush.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Failed flushes since the last successful one.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    /// True once a fatal error has stopped the bus.
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Commit everything queued so far as one batch.
    ///
    /// An empty queue is a no-op that never reaches the sink.
    pub fn flush(&self) -> Result<FlushReport> {
        self.inner.flush()
    }

    /// Start, restart or (with `None`) stop periodic flushing.
    pub fn set_auto_flush(&self, interval: Option<Duration>) -> Result<()> {
        let mut worker = self.worker.lock();
        if let Some(mut running) = worker.take() {
            running.stop();
        }

        let Some(interval) = interval.filter(|i| !i.is_zero()) else {
            debug!(bus = %self.inner.name, "auto-flush off");
            return Ok(());
        };
        if self.is_disabled() {
            return Err(self.inner.disabled_error());
        }

        let inner = self.inner.clone();
        *worker = Some(FlushWorker::spawn(interval, move || {
            // Failures are already reported by flush itself.
            let _ = inner.flush();
            !inner.disabled.load(Ordering::SeqCst)
        })?);
        info!(bus = %self.inner.name, interval_ms = interval.as_millis() as u64, "auto-flush on");
        Ok(())
    }

    /// Current auto-flush interval, if a worker is running.
    pub fn auto_flush_interval(&self) -> Option<Duration> {
        self.worker.lock().as_ref().map(FlushWorker::interval)
    }
}

impl<T> Drop for SynchronizationBus<T> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.get_mut().take() {
            worker.stop();
        }
    }
}

impl<T: TableRow> Inner<T> {
    fn flush(&self) -> Result<FlushReport> {
        let _serialized = self.flush_lock.lock();
        if self.disabled.load(Ordering::SeqCst) {
            return Err(self.disabled_error());
        }

        // Snapshot without holding the queue lock across the commit, so
        // producers keep enqueuing while the sink works.
        let snapshot: Vec<DatabaseAction<T>> = self.queue.lock().iter().cloned().collect();
        if snapshot.is_empty() {
            return Ok(FlushReport::default());
        }
        let batch = coalesce(&snapshot);

        match self.sink.commit(&batch) {
            Ok(_) => {
                // Only this flush removes from the front, and it holds the
                // flush lock, so the first `snapshot.len()` entries are
                // exactly the ones committed.
                self.queue.lock().drain(..snapshot.len());
                self.consecutive_failures.store(0, Ordering::SeqCst);
                debug!(
                    bus = %self.name,
                    actions = snapshot.len(),
                    committed = batch.len(),
                    "flushed"
                );
                Ok(FlushReport {
                    actions: snapshot.len(),
                    committed: batch.len(),
                })
            }
            Err(e) if e.is_fatal() => {
                self.disabled.store(true, Ordering::SeqCst);
                let message = format!("flush of {} actions failed fatally: {}", snapshot.len(), e);
                self.report(LogLevel::Critical, message.clone());
                Err(SyncError::Fatal { message })
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let level = if failures >= ESCALATION_THRESHOLD {
                    LogLevel::Critical
                } else {
                    LogLevel::Warning
                };
                warn!(bus = %self.name, failures, error = %e, "flush failed, actions kept queued");
                self.report(
                    level,
                    format!(
                        "flush of {} actions failed ({} in a row): {}",
                        snapshot.len(),
                        failures,
                        e
                    ),
                );
                Err(e)
            }
        }
    }

    fn report(&self, level: LogLevel, message: String) {
        self.reporter
            .report(LogMessage::new(level, format!("bus.{}", self.name), message));
    }

    fn disabled_error(&self) -> SyncError {
        SyncError::Fatal {
            message: format!("bus '{}' is disabled after a fatal error", self.name),
        }
    }
}
