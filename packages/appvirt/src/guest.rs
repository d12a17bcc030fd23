//! The guest side: providers fed by the host and the hooks that drive them.

use std::sync::Arc;
use std::time::Duration;

use appvirt_connection::{
    ForwardingReportSink, GuestBootstrap, HostRoles, ProcessConnection, SynchronizerSink,
};
use appvirt_core::{
    CreationDisposition, EngineConfig, FileTableEntry, RegistryItem, ReportSink,
    RequestNormalizer, ResourceKind,
};
use appvirt_provider::{
    FileSystem, FileSystemProvider, HostFileSystem, IdleRelease, MemoryRegistry, Outcome,
    RealRegistry, RegistryProvider, ReleasingProvider, ResourceProvider,
};
use appvirt_sync::{ActionSink, SynchronizationBus};
use tracing::{info, trace, warn};

use crate::error::{AppError, Result};
use crate::hooks::{HookCall, HookInstaller, HookReply, InterceptedApi};

/// Guest-local settings that do not come from the host.
pub struct GuestOptions {
    /// Relative paths are rooted here.
    pub working_directory: String,
    pub idle_release: Option<Duration>,
    pub flush_interval: Option<Duration>,
    pub file_system: Arc<dyn FileSystem>,
    pub real_registry: Arc<dyn RealRegistry>,
}

impl Default for GuestOptions {
    fn default() -> Self {
        Self {
            working_directory: "C:\\".to_string(),
            idle_release: None,
            flush_interval: Some(Duration::from_millis(2000)),
            file_system: Arc::new(HostFileSystem::new()),
            real_registry: Arc::new(MemoryRegistry::new()),
        }
    }
}

impl GuestOptions {
    /// Timing taken from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            idle_release: config.idle_release(),
            flush_interval: config.flush_interval(),
            ..Self::default()
        }
    }
}

enum Files {
    Plain(FileSystemProvider),
    Releasing(ReleasingProvider<FileSystemProvider>),
}

impl Files {
    fn provider(&self) -> &FileSystemProvider {
        match self {
            Files::Plain(provider) => provider,
            Files::Releasing(releasing) => releasing.inner(),
        }
    }

    fn resolver(&self) -> &dyn ResourceProvider {
        match self {
            Files::Plain(provider) => provider,
            Files::Releasing(releasing) => releasing,
        }
    }
}

/// Everything a guest process runs: both providers, their buses and the
/// connection they report to.
pub struct GuestContext {
    connection: Arc<ProcessConnection>,
    normalizer: RequestNormalizer,
    files: Files,
    registry: RegistryProvider,
    /// Shared by every hook; none of them redirects once it fires.
    release: Option<Arc<IdleRelease>>,
    file_system_bus: Arc<SynchronizationBus<FileTableEntry>>,
    registry_bus: Arc<SynchronizationBus<RegistryItem>>,
    reporter: Arc<ForwardingReportSink<dyn HostRoles>>,
}

impl GuestContext {
    /// Initialize `connection` and build the providers from what the host
    /// sends back.
    pub fn new(connection: Arc<ProcessConnection>, options: GuestOptions) -> Result<Self> {
        let bootstrap: Arc<GuestBootstrap> = connection.initialize()?;
        let host = connection.host();

        let reporter = Arc::new(ForwardingReportSink::new(host.clone(), bootstrap.log_level));
        let report: Arc<dyn ReportSink> = reporter.clone();
        let sink = Arc::new(SynchronizerSink::new(host));
        let file_system_bus = Arc::new(SynchronizationBus::new(
            "filesystem",
            sink.clone() as Arc<dyn ActionSink<FileTableEntry>>,
            report.clone(),
        ));
        let registry_bus = Arc::new(SynchronizationBus::new(
            "registry",
            sink as Arc<dyn ActionSink<RegistryItem>>,
            report,
        ));
        file_system_bus.set_auto_flush(options.flush_interval)?;
        registry_bus.set_auto_flush(options.flush_interval)?;

        let provider = FileSystemProvider::new(
            &bootstrap.file_system_root,
            bootstrap.file_system_rules.clone(),
            file_system_bus.clone(),
        )
        .with_file_system(options.file_system)
        .with_entries(bootstrap.file_system_table.iter().cloned())
        .with_gate(connection.gate());
        let release = options.idle_release.map(|timeout| Arc::new(IdleRelease::new(timeout)));
        let files = match &release {
            Some(release) => Files::Releasing(ReleasingProvider::sharing(provider, release.clone())),
            None => Files::Plain(provider),
        };

        let registry = RegistryProvider::new(bootstrap.registry_rules.clone(), registry_bus.clone())
            .with_real_registry(options.real_registry)
            .with_gate(connection.gate())
            .with_items(bootstrap.registry.iter().cloned());

        let normalizer = RequestNormalizer::new(&options.working_directory)
            .with_virtual_root(&bootstrap.file_system_root);

        info!(
            process_id = connection.process_id(),
            session = %connection.session(),
            root = %bootstrap.file_system_root,
            "guest ready"
        );
        Ok(Self {
            connection,
            normalizer,
            files,
            registry,
            release,
            file_system_bus,
            registry_bus,
            reporter,
        })
    }

    pub fn connection(&self) -> &ProcessConnection {
        &self.connection
    }

    pub fn file_system(&self) -> &FileSystemProvider {
        self.files.provider()
    }

    pub fn registry(&self) -> &RegistryProvider {
        &self.registry
    }

    /// True once the idle countdown has released the guest.
    pub fn is_released(&self) -> bool {
        self.release.as_ref().is_some_and(|release| release.is_released())
    }

    /// Actions not yet delivered to the host.
    pub fn pending(&self) -> usize {
        self.file_system_bus.pending() + self.registry_bus.pending()
    }

    /// Deliver every queued action and report to the host.
    pub fn flush(&self) -> Result<()> {
        self.file_system_bus.flush()?;
        self.registry_bus.flush()?;
        self.reporter.flush()?;
        Ok(())
    }

    /// Register one handler per intercepted API. Returns how many were
    /// installed.
    pub fn install_hooks(self: &Arc<Self>, installer: &mut dyn HookInstaller) -> Result<usize> {
        for api in InterceptedApi::ALL {
            let context = Arc::clone(self);
            installer.install(
                api,
                Arc::new(move |call: HookCall| {
                    let received = call.api();
                    if received != api {
                        return Err(AppError::MismatchedCall { api, received });
                    }
                    context.handle(call)
                }),
            )?;
        }
        info!(hooks = InterceptedApi::ALL.len(), "hooks installed");
        Ok(InterceptedApi::ALL.len())
    }

    /// Handle one intercepted call. Every call counts as activity; once
    /// released, every call passes through.
    pub fn handle(&self, call: HookCall) -> Result<HookReply> {
        trace!(api = %call.api(), "intercepted");
        if let Some(release) = &self.release {
            if !release.record_activity() {
                return Ok(HookReply::PassThrough);
            }
        }
        match call {
            HookCall::CreateFile { path, disposition } => {
                self.redirect(&path, ResourceKind::File, disposition)
            }
            HookCall::CreateDirectory { path } => {
                self.redirect(&path, ResourceKind::Directory, CreationDisposition::OpenAlways)
            }
            HookCall::LoadLibrary { path } => {
                self.redirect(&path, ResourceKind::Library, CreationDisposition::OpenExisting)
            }
            HookCall::DeleteFile { path } => self.delete_file(&path),
            HookCall::MoveFile { from, to } => self.move_file(&from, &to),
            HookCall::RegOpenKey { path } => Ok(HookReply::Key(
                self.registry.open_key(&path, CreationDisposition::OpenExisting)?,
            )),
            HookCall::RegCreateKey { path } => Ok(HookReply::Key(
                self.registry.open_key(&path, CreationDisposition::OpenAlways)?,
            )),
            HookCall::RegQueryValue { key, name } => {
                Ok(HookReply::Value(self.registry.query_value(key, &name)?))
            }
            HookCall::RegSetValue { key, name, data } => {
                self.registry.set_value(key, &name, data)?;
                Ok(HookReply::Handled)
            }
            HookCall::RegDeleteValue { key, name } => {
                Ok(HookReply::Removed(self.registry.delete_value(key, &name)?))
            }
            HookCall::RegDeleteKey { key } => Ok(HookReply::Removed(self.registry.delete_key(key)?)),
            HookCall::RegCloseKey { key } => {
                self.registry.close_key(key)?;
                Ok(HookReply::Handled)
            }
        }
    }

    /// Stop auto-flushing, deliver what is left and disconnect.
    pub fn shutdown(&self) -> Result<()> {
        self.file_system_bus.set_auto_flush(None)?;
        self.registry_bus.set_auto_flush(None)?;
        let flushed = self.flush();
        if let Err(e) = &flushed {
            warn!(error = %e, pending = self.pending(), "shutting down with undelivered actions");
        }
        self.connection.disconnect();
        flushed
    }

    fn redirect(
        &self,
        path: &str,
        kind: ResourceKind,
        disposition: CreationDisposition,
    ) -> Result<HookReply> {
        let request = self.normalizer.request(path, kind, disposition);
        let resolution = self.files.resolver().resolve(&request)?;
        if resolution.is_redirected() {
            trace!(from = path, to = resolution.target(), outcome = %resolution.outcome(), "redirected");
            Ok(HookReply::Path(resolution.target().to_string()))
        } else {
            Ok(HookReply::PassThrough)
        }
    }

    /// Only a `Transparent` rule lets a delete reach the real file. A
    /// mapped file is deleted at its virtual path; an unmapped one does not
    /// exist in the virtual view.
    fn delete_file(&self, path: &str) -> Result<HookReply> {
        let request = self
            .normalizer
            .request(path, ResourceKind::File, CreationDisposition::OpenExisting);
        let resolution = self.files.provider().unmap(&request)?;
        Ok(match resolution.outcome() {
            Outcome::PassThrough => HookReply::PassThrough,
            Outcome::Existing => HookReply::Path(resolution.target().to_string()),
            _ => HookReply::NotFound,
        })
    }

    /// Moves follow the same rule as deletes on the source side: only a
    /// `Transparent` source may be moved for real.
    fn move_file(&self, from: &str, to: &str) -> Result<HookReply> {
        let from = self
            .normalizer
            .request(from, ResourceKind::File, CreationDisposition::OpenExisting);
        let to = self
            .normalizer
            .request(to, ResourceKind::File, CreationDisposition::CreateAlways);
        let provider = self.files.provider();

        match (provider.passes_through(&from)?, provider.passes_through(&to)?) {
            (true, true) => Ok(HookReply::PassThrough),
            (true, false) => {
                let target = provider.resolve(&to)?;
                Ok(HookReply::Move {
                    from: from.original().to_string(),
                    to: target.target().to_string(),
                })
            }
            (false, true) => {
                let source = provider.unmap(&from)?;
                Ok(match source.outcome() {
                    Outcome::Existing => HookReply::Move {
                        from: source.target().to_string(),
                        to: to.original().to_string(),
                    },
                    _ => HookReply::NotFound,
                })
            }
            (false, false) => Ok(match provider.rename(&from, &to)? {
                Some(moved) => {
                    trace!(from = from.identifier(), to = moved.real(), "moved mapping");
                    HookReply::Handled
                }
                None => HookReply::NotFound,
            }),
        }
    }
}
