//! A guest process's connection to its host.
//!
//! A connection moves through four states:
//!
//! ```text
//! Uninitialized -> Initializing -> Connected -> Disconnected
//!                              \-----------------^
//! ```
//!
//! `Disconnected` is terminal. While in it the connection acts as a closed
//! [`RedirectionGate`], so providers stop redirecting instead of building
//! up virtual state the host never hears about.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use appvirt_core::{FileTableEntry, LogLevel, RedirectionGate, RegistryItem, RuleCollection};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::RemoteHost;
use crate::error::{ConnectionError, Result};
use crate::roles::{HostRoles, Reporter, ResourceLoader};
use crate::transport::Transport;

/// Identifies one connection in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `initialize` has not been called yet.
    Uninitialized,
    /// The first `initialize` is loading state from the host.
    Initializing,
    Connected,
    /// The host is gone. Nothing is redirected from here on.
    Disconnected,
}

/// Everything a guest loads from its host before redirecting.
#[derive(Debug, Clone)]
pub struct GuestBootstrap {
    pub file_system_root: String,
    pub file_system_rules: RuleCollection,
    pub registry_rules: RuleCollection,
    pub file_system_table: Vec<FileTableEntry>,
    pub registry: Vec<RegistryItem>,
    pub log_level: LogLevel,
}

struct Shared {
    session: SessionId,
    process_id: u32,
    host: Arc<dyn HostRoles>,
    state: Mutex<ConnectionState>,
    changed: Condvar,
    bootstrap: Mutex<Option<Arc<GuestBootstrap>>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn load(&self) -> Result<GuestBootstrap> {
        let host = self.host.as_ref();
        host.ping()?;
        Ok(GuestBootstrap {
            file_system_root: host.file_system_root()?,
            file_system_rules: host.file_system_rules()?,
            registry_rules: host.registry_rules()?,
            file_system_table: host.load_file_system_table()?,
            registry: host.load_registry()?,
            log_level: host.required_log_level()?,
        })
    }

    fn ping(&self) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(ConnectionError::Disconnected);
        }
        self.host.ping().inspect_err(|e| self.disconnect(&e.to_string()))
    }

    fn disconnect(&self, reason: &str) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Disconnected {
            *state = ConnectionState::Disconnected;
            self.changed.notify_all();
            warn!(session = %self.session, process_id = self.process_id, reason, "disconnected from host");
        }
    }
}

impl RedirectionGate for Shared {
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// A periodic ping on its own thread. Ends on the first failed ping.
struct Heartbeat {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread = thread::Builder::new()
            .name("appvirt-heartbeat".to_string())
            .spawn({
                let stop = stop.clone();
                move || loop {
                    {
                        let (stopped, wake) = &*stop;
                        let mut stopped = stopped.lock();
                        if !*stopped {
                            wake.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            return;
                        }
                    }
                    if shared.ping().is_err() {
                        return;
                    }
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        let (stopped, wake) = &*self.stop;
        *stopped.lock() = true;
        wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The guest end of a guest/host pair.
///
/// Shared between every interception point in the guest; all methods take
/// `&self`.
pub struct ProcessConnection {
    shared: Arc<Shared>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl ProcessConnection {
    /// A connection to any host implementation.
    pub fn new(process_id: u32, host: Arc<dyn HostRoles>) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: SessionId::new(),
                process_id,
                host,
                state: Mutex::new(ConnectionState::Uninitialized),
                changed: Condvar::new(),
                bootstrap: Mutex::new(None),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    /// A connection over `transport`; every host call waits at most
    /// `timeout`.
    pub fn over(process_id: u32, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self::new(process_id, Arc::new(RemoteHost::new(transport, timeout)))
    }

    pub fn session(&self) -> SessionId {
        self.shared.session
    }

    pub fn process_id(&self) -> u32 {
        self.shared.process_id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The host roles behind this connection.
    pub fn host(&self) -> Arc<dyn HostRoles> {
        self.shared.host.clone()
    }

    /// This connection as a gate for providers: open only while connected.
    pub fn gate(&self) -> Arc<dyn RedirectionGate> {
        self.shared.clone()
    }

    /// Load the guest's initial state from the host.
    ///
    /// Idempotent: the first call does the work and every later call gets
    /// the same bootstrap. Concurrent first calls wait for the one doing
    /// the work. A failure is terminal.
    pub fn initialize(&self) -> Result<Arc<GuestBootstrap>> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            loop {
                let current = *state;
                match current {
                    ConnectionState::Connected => {
                        return shared.bootstrap.lock().clone().ok_or(ConnectionError::Disconnected);
                    }
                    ConnectionState::Disconnected => return Err(ConnectionError::Disconnected),
                    ConnectionState::Initializing => shared.changed.wait(&mut state),
                    ConnectionState::Uninitialized => break,
                }
            }
            *state = ConnectionState::Initializing;
        }

        debug!(session = %shared.session, process_id = shared.process_id, "initializing");
        let loaded = shared.load();

        let mut state = shared.state.lock();
        if *state != ConnectionState::Initializing {
            return Err(ConnectionError::Disconnected);
        }
        match loaded {
            Ok(bootstrap) => {
                let bootstrap = Arc::new(bootstrap);
                *shared.bootstrap.lock() = Some(bootstrap.clone());
                *state = ConnectionState::Connected;
                shared.changed.notify_all();
                info!(
                    session = %shared.session,
                    process_id = shared.process_id,
                    root = %bootstrap.file_system_root,
                    entries = bootstrap.file_system_table.len(),
                    registry_items = bootstrap.registry.len(),
                    "connected to host"
                );
                Ok(bootstrap)
            }
            Err(e) => {
                *state = ConnectionState::Disconnected;
                shared.changed.notify_all();
                warn!(session = %shared.session, error = %e, "initialization failed");
                Err(e)
            }
        }
    }

    /// Check that the host is alive. A failed ping disconnects for good.
    pub fn ping(&self) -> Result<()> {
        self.shared.ping()
    }

    /// Ping every `interval` in the background until a ping fails or the
    /// connection is dropped.
    pub fn start_heartbeat(&self, interval: Duration) -> Result<()> {
        let mut heartbeat = self.heartbeat.lock();
        if let Some(mut running) = heartbeat.take() {
            running.stop();
        }
        *heartbeat = Some(Heartbeat::spawn(self.shared.clone(), interval)?);
        Ok(())
    }

    /// Enter the terminal state.
    pub fn disconnect(&self) {
        if let Some(mut heartbeat) = self.heartbeat.lock().take() {
            heartbeat.stop();
        }
        self.shared.disconnect("disconnect requested");
    }
}

impl Drop for ProcessConnection {
    fn drop(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.stop();
        }
    }
}
