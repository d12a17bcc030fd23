//! The host side: owns both stores and answers guest requests.

use std::sync::Arc;
use std::time::Duration;

use appvirt_core::{
    DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, ReportSink,
    RuleCollection, TableRow, TracingReportSink,
};
use appvirt_store::Database;
use appvirt_sync::{ActionSink, LocalSink, SynchronizationBus};
use tracing::{debug, warn};

use crate::error::{ConnectionError, Result};
use crate::protocol::{HostRequest, HostResponse};
use crate::roles::{HostRoles, Reporter, ResourceLoader, Synchronizer};

/// One persisted table on the host, fronted by its own bus.
pub struct HostTable<T> {
    store: Arc<LocalSink<T>>,
    bus: SynchronizationBus<T>,
}

impl<T: TableRow> HostTable<T> {
    /// Wrap an initialized database. The bus is named after the table.
    pub fn new(database: Database<T>, reporter: Arc<dyn ReportSink>) -> Self {
        let store = Arc::new(LocalSink::new(database));
        let sink: Arc<dyn ActionSink<T>> = store.clone();
        let bus = SynchronizationBus::new(store.table(), sink, reporter);
        Self { store, bus }
    }

    pub fn bus(&self) -> &SynchronizationBus<T> {
        &self.bus
    }

    /// Every persisted item, after committing whatever is still queued.
    pub fn load(&self) -> Result<Vec<T>> {
        if let Err(e) = self.bus.flush() {
            warn!(table = %self.bus.name(), error = %e, "loading with unflushed actions");
        }
        Ok(self.store.read_all()?)
    }

    /// Take a guest's actions.
    ///
    /// Once queued the actions are the host's responsibility: a transient
    /// commit failure leaves them on the host bus for a later flush and the
    /// guest is still told they were accepted.
    pub fn accept(&self, actions: Vec<DatabaseAction<T>>) -> Result<usize> {
        if self.bus.is_disabled() {
            return Err(ConnectionError::Remote {
                message: format!("synchronization of '{}' is disabled", self.bus.name()),
            });
        }
        let count = actions.len();
        self.bus.enqueue_all(actions);
        match self.bus.flush() {
            Ok(_) => Ok(count),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(table = %self.bus.name(), error = %e, "accepted actions stay queued");
                Ok(count)
            }
        }
    }
}

/// The concrete host: serves configuration, persists guest actions and
/// collects guest reports.
pub struct HostService {
    file_system_root: String,
    file_system_rules: RuleCollection,
    registry_rules: RuleCollection,
    file_system: HostTable<FileTableEntry>,
    registry: HostTable<RegistryItem>,
    reporter: Arc<dyn ReportSink>,
    log_level: LogLevel,
}

impl HostService {
    pub fn new(
        file_system_root: impl Into<String>,
        file_system: HostTable<FileTableEntry>,
        registry: HostTable<RegistryItem>,
    ) -> Self {
        Self {
            file_system_root: file_system_root.into(),
            file_system_rules: RuleCollection::new(),
            registry_rules: RuleCollection::default_registry(),
            file_system,
            registry,
            reporter: Arc::new(TracingReportSink),
            log_level: LogLevel::Info,
        }
    }

    pub fn with_rules(mut self, file_system: RuleCollection, registry: RuleCollection) -> Self {
        self.file_system_rules = file_system;
        self.registry_rules = registry;
        self
    }

    /// Where guest reports end up.
    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn file_system_table(&self) -> &HostTable<FileTableEntry> {
        &self.file_system
    }

    pub fn registry_table(&self) -> &HostTable<RegistryItem> {
        &self.registry
    }

    /// Set the auto-flush interval of both host buses.
    pub fn set_auto_flush(&self, interval: Option<Duration>) -> Result<()> {
        self.file_system.bus.set_auto_flush(interval)?;
        self.registry.bus.set_auto_flush(interval)?;
        Ok(())
    }

    /// Flush both host buses.
    pub fn flush(&self) -> Result<()> {
        self.file_system.bus.flush()?;
        self.registry.bus.flush()?;
        Ok(())
    }
}

impl ResourceLoader for HostService {
    fn file_system_root(&self) -> Result<String> {
        Ok(self.file_system_root.clone())
    }

    fn load_file_system_table(&self) -> Result<Vec<FileTableEntry>> {
        self.file_system.load()
    }

    fn load_registry(&self) -> Result<Vec<RegistryItem>> {
        self.registry.load()
    }

    fn file_system_rules(&self) -> Result<RuleCollection> {
        Ok(self.file_system_rules.clone())
    }

    fn registry_rules(&self) -> Result<RuleCollection> {
        Ok(self.registry_rules.clone())
    }
}

impl Synchronizer for HostService {
    fn sync_file_system_actions(&self, actions: Vec<DatabaseAction<FileTableEntry>>) -> Result<usize> {
        self.file_system.accept(actions)
    }

    fn sync_registry_actions(&self, actions: Vec<DatabaseAction<RegistryItem>>) -> Result<usize> {
        self.registry.accept(actions)
    }
}

impl Reporter for HostService {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn report_message(&self, message: LogMessage) -> Result<()> {
        if message.level >= self.log_level {
            self.reporter.report(message);
        }
        Ok(())
    }

    fn report_messages(&self, messages: Vec<LogMessage>) -> Result<()> {
        let wanted: Vec<_> = messages
            .into_iter()
            .filter(|m| m.level >= self.log_level)
            .collect();
        if !wanted.is_empty() {
            self.reporter.report_batch(wanted);
        }
        Ok(())
    }

    fn required_log_level(&self) -> Result<LogLevel> {
        Ok(self.log_level)
    }
}

/// Answer one request. Failures become [`HostResponse::Error`].
pub fn dispatch(roles: &dyn HostRoles, request: HostRequest) -> HostResponse {
    let operation = request.operation();
    let result = match request {
        HostRequest::Ping => roles.ping().map(|()| HostResponse::Pong),
        HostRequest::GetFileSystemRoot => roles.file_system_root().map(HostResponse::FileSystemRoot),
        HostRequest::LoadFileSystemTable => roles
            .load_file_system_table()
            .map(HostResponse::FileSystemTable),
        HostRequest::LoadRegistry => roles.load_registry().map(HostResponse::Registry),
        HostRequest::GetFileSystemRules => roles.file_system_rules().map(HostResponse::Rules),
        HostRequest::GetRegistryRules => roles.registry_rules().map(HostResponse::Rules),
        HostRequest::SyncFileSystemActions(actions) => roles
            .sync_file_system_actions(actions)
            .map(HostResponse::Synced),
        HostRequest::SyncRegistryActions(actions) => roles
            .sync_registry_actions(actions)
            .map(HostResponse::Synced),
        HostRequest::ReportMessage(message) => {
            roles.report_message(message).map(|()| HostResponse::Reported)
        }
        HostRequest::ReportMessages(messages) => {
            roles.report_messages(messages).map(|()| HostResponse::Reported)
        }
        HostRequest::GetRequiredLogLevel => roles.required_log_level().map(HostResponse::LogLevel),
    };
    result.unwrap_or_else(|e| {
        debug!(operation, error = %e, "request failed");
        HostResponse::Error(e.to_string())
    })
}
