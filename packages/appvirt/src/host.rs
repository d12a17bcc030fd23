//! The host side: stores, buses and the service guests talk to.

use std::net::ToSocketAddrs;
use std::sync::Arc;

use appvirt_connection::{
    ChannelTransport, GuestRegistry, HostRoles, HostService, HostTable, ProcessConnection,
    TcpServer,
};
use appvirt_core::{EngineConfig, FileTableEntry, RegistryItem, ReportSink, TracingReportSink};
use appvirt_store::Database;
use tracing::info;

use crate::error::Result;
use crate::guest::{GuestContext, GuestOptions};

/// Owns everything the host runs for one virtual environment.
pub struct HostContext {
    config: EngineConfig,
    service: Arc<HostService>,
    guests: GuestRegistry,
}

impl HostContext {
    /// Validate `config`, open and initialize both stores and start the
    /// host buses. Any failure here is fatal.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_reporter(config, Arc::new(TracingReportSink))
    }

    /// Like [`open`](Self::open), with guest reports and bus failures
    /// delivered to `reporter`.
    pub fn open_with_reporter(config: EngineConfig, reporter: Arc<dyn ReportSink>) -> Result<Self> {
        config.validate()?;

        let mut file_system = Database::<FileTableEntry>::open(&config.database.file_system)?;
        file_system.initialize()?;
        let mut registry = Database::<RegistryItem>::open(&config.database.registry)?;
        registry.initialize()?;

        let service = HostService::new(
            config.file_system_root.as_str(),
            HostTable::new(file_system, reporter.clone()),
            HostTable::new(registry, reporter.clone()),
        )
        .with_rules(
            config.file_system_rule_collection(),
            config.registry_rule_collection(),
        )
        .with_reporter(reporter)
        .with_log_level(config.log_level);
        service.set_auto_flush(config.flush_interval())?;

        let service = Arc::new(service);
        let roles: Arc<dyn HostRoles> = service.clone();
        info!(root = %config.file_system_root, "host ready");
        Ok(Self {
            config,
            service,
            guests: GuestRegistry::new(roles),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<HostService> {
        &self.service
    }

    pub fn guests(&self) -> &GuestRegistry {
        &self.guests
    }

    /// Serve guests over TCP until the returned server is dropped.
    pub fn serve_tcp(&self, addr: impl ToSocketAddrs) -> Result<TcpServer> {
        let roles: Arc<dyn HostRoles> = self.service.clone();
        Ok(TcpServer::bind(addr, roles)?)
    }

    /// Publish a channel for `process_id` and return its client end.
    pub fn channel_for(&self, process_id: u32) -> Result<ChannelTransport> {
        self.guests.publish(process_id)?;
        Ok(self.guests.connect(process_id)?)
    }

    /// An in-process guest connected over its own channel.
    pub fn spawn_guest(&self, process_id: u32, options: GuestOptions) -> Result<Arc<GuestContext>> {
        let transport = self.channel_for(process_id)?;
        let connection = ProcessConnection::over(
            process_id,
            Arc::new(transport),
            self.config.ping_timeout(),
        );
        Ok(Arc::new(GuestContext::new(Arc::new(connection), options)?))
    }

    /// Commit everything the host buses still hold.
    pub fn flush(&self) -> Result<()> {
        Ok(self.service.flush()?)
    }
}
