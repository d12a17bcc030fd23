//! The guest's view of a host reached through a [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use appvirt_core::{
    DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, RuleCollection,
};

use crate::error::{ConnectionError, Result};
use crate::protocol::{HostRequest, HostResponse};
use crate::roles::{Reporter, ResourceLoader, Synchronizer};
use crate::transport::Transport;

/// Implements every host role by sending requests over a transport.
///
/// Every call waits at most `timeout`.
#[derive(Clone)]
pub struct RemoteHost {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RemoteHost {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call(&self, request: HostRequest) -> Result<HostResponse> {
        match self.transport.call(request, self.timeout)? {
            HostResponse::Error(message) => Err(ConnectionError::Remote { message }),
            response => Ok(response),
        }
    }
}

fn unexpected(operation: &'static str, response: HostResponse) -> ConnectionError {
    ConnectionError::UnexpectedResponse {
        operation,
        response: response.kind().to_string(),
    }
}

impl ResourceLoader for RemoteHost {
    fn file_system_root(&self) -> Result<String> {
        match self.call(HostRequest::GetFileSystemRoot)? {
            HostResponse::FileSystemRoot(root) => Ok(root),
            other => Err(unexpected("get_file_system_root", other)),
        }
    }

    fn load_file_system_table(&self) -> Result<Vec<FileTableEntry>> {
        match self.call(HostRequest::LoadFileSystemTable)? {
            HostResponse::FileSystemTable(entries) => Ok(entries),
            other => Err(unexpected("load_file_system_table", other)),
        }
    }

    fn load_registry(&self) -> Result<Vec<RegistryItem>> {
        match self.call(HostRequest::LoadRegistry)? {
            HostResponse::Registry(items) => Ok(items),
            other => Err(unexpected("load_registry", other)),
        }
    }

    fn file_system_rules(&self) -> Result<RuleCollection> {
        match self.call(HostRequest::GetFileSystemRules)? {
            HostResponse::Rules(rules) => Ok(rules),
            other => Err(unexpected("get_file_system_rules", other)),
        }
    }

    fn registry_rules(&self) -> Result<RuleCollection> {
        match self.call(HostRequest::GetRegistryRules)? {
            HostResponse::Rules(rules) => Ok(rules),
            other => Err(unexpected("get_registry_rules", other)),
        }
    }
}

impl Synchronizer for RemoteHost {
    fn sync_file_system_actions(&self, actions: Vec<DatabaseAction<FileTableEntry>>) -> Result<usize> {
        match self.call(HostRequest::SyncFileSystemActions(actions))? {
            HostResponse::Synced(count) => Ok(count),
            other => Err(unexpected("sync_file_system_actions", other)),
        }
    }

    fn sync_registry_actions(&self, actions: Vec<DatabaseAction<RegistryItem>>) -> Result<usize> {
        match self.call(HostRequest::SyncRegistryActions(actions))? {
            HostResponse::Synced(count) => Ok(count),
            other => Err(unexpected("sync_registry_actions", other)),
        }
    }
}

impl Reporter for RemoteHost {
    fn ping(&self) -> Result<()> {
        match self.call(HostRequest::Ping)? {
            HostResponse::Pong => Ok(()),
            other => Err(unexpected("ping", other)),
        }
    }

    fn report_message(&self, message: LogMessage) -> Result<()> {
        match self.call(HostRequest::ReportMessage(message))? {
            HostResponse::Reported => Ok(()),
            other => Err(unexpected("report_message", other)),
        }
    }

    fn report_messages(&self, messages: Vec<LogMessage>) -> Result<()> {
        match self.call(HostRequest::ReportMessages(messages))? {
            HostResponse::Reported => Ok(()),
            other => Err(unexpected("report_messages", other)),
        }
    }

    fn required_log_level(&self) -> Result<LogLevel> {
        match self.call(HostRequest::GetRequiredLogLevel)? {
            HostResponse::LogLevel(level) => Ok(level),
            other => Err(unexpected("get_required_log_level", other)),
        }
    }
}
