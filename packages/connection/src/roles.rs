//! The three contracts a host offers its guests.
//!
//! A guest only ever sees these traits. In-process tests implement them
//! directly; across a process boundary [`RemoteHost`](crate::RemoteHost)
//! implements them on top of a [`Transport`](crate::Transport).

use appvirt_core::{
    DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, RuleCollection,
};

use crate::error::Result;

/// Supplies everything a guest needs before it can redirect anything.
pub trait ResourceLoader: Send + Sync {
    fn file_system_root(&self) -> Result<String>;

    fn load_file_system_table(&self) -> Result<Vec<FileTableEntry>>;

    fn load_registry(&self) -> Result<Vec<RegistryItem>>;

    fn file_system_rules(&self) -> Result<RuleCollection>;

    fn registry_rules(&self) -> Result<RuleCollection>;
}

/// Accepts a guest's table mutations. Returns the number of actions taken.
pub trait Synchronizer: Send + Sync {
    fn sync_file_system_actions(&self, actions: Vec<DatabaseAction<FileTableEntry>>) -> Result<usize>;

    fn sync_registry_actions(&self, actions: Vec<DatabaseAction<RegistryItem>>) -> Result<usize>;
}

/// Liveness and log forwarding.
pub trait Reporter: Send + Sync {
    fn ping(&self) -> Result<()>;

    fn report_message(&self, message: LogMessage) -> Result<()>;

    fn report_messages(&self, messages: Vec<LogMessage>) -> Result<()>;

    /// The lowest level the host wants to receive.
    fn required_log_level(&self) -> Result<LogLevel>;
}

/// A full host: all three roles behind one object.
pub trait HostRoles: ResourceLoader + Synchronizer + Reporter {}

impl<T: ResourceLoader + Synchronizer + Reporter> HostRoles for T {}
