//! Wire messages exchanged between a guest and its host.
//!
//! Every message is an [`Envelope`]; replies carry the id of the request
//! they answer. On stream transports each envelope is one line of JSON.

use appvirt_core::{
    DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, RuleCollection,
};
use serde::{Deserialize, Serialize};

/// A request or response tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, body: T) -> Self {
        Self { id, body }
    }
}

/// Operations a guest can ask of its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum HostRequest {
    Ping,
    GetFileSystemRoot,
    LoadFileSystemTable,
    LoadRegistry,
    GetFileSystemRules,
    GetRegistryRules,
    SyncFileSystemActions(Vec<DatabaseAction<FileTableEntry>>),
    SyncRegistryActions(Vec<DatabaseAction<RegistryItem>>),
    ReportMessage(LogMessage),
    ReportMessages(Vec<LogMessage>),
    GetRequiredLogLevel,
}

impl HostRequest {
    /// Operation name, for logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            HostRequest::Ping => "ping",
            HostRequest::GetFileSystemRoot => "get_file_system_root",
            HostRequest::LoadFileSystemTable => "load_file_system_table",
            HostRequest::LoadRegistry => "load_registry",
            HostRequest::GetFileSystemRules => "get_file_system_rules",
            HostRequest::GetRegistryRules => "get_registry_rules",
            HostRequest::SyncFileSystemActions(_) => "sync_file_system_actions",
            HostRequest::SyncRegistryActions(_) => "sync_registry_actions",
            HostRequest::ReportMessage(_) => "report_message",
            HostRequest::ReportMessages(_) => "report_messages",
            HostRequest::GetRequiredLogLevel => "get_required_log_level",
        }
    }
}

/// Host replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "value")]
pub enum HostResponse {
    Pong,
    FileSystemRoot(String),
    FileSystemTable(Vec<FileTableEntry>),
    Registry(Vec<RegistryItem>),
    Rules(RuleCollection),
    /// Number of actions the host accepted.
    Synced(usize),
    Reported,
    LogLevel(LogLevel),
    Error(String),
}

impl HostResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            HostResponse::Pong => "pong",
            HostResponse::FileSystemRoot(_) => "file_system_root",
            HostResponse::FileSystemTable(_) => "file_system_table",
            HostResponse::Registry(_) => "registry",
            HostResponse::Rules(_) => "rules",
            HostResponse::Synced(_) => "synced",
            HostResponse::Reported => "reported",
            HostResponse::LogLevel(_) => "log_level",
            HostResponse::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appvirt_core::{RegistryData, ResourceKind};

    #[test]
    fn request_wire_shape() {
        let envelope = Envelope::new(7, HostRequest::Ping);
        assert_eq!(
            serde_json::to_string(&envelope).unwrap(),
            r#"{"id":7,"body":{"op":"Ping"}}"#
        );
    }

    #[test]
    fn actions_survive_the_wire() {
        let request = HostRequest::SyncRegistryActions(vec![
            DatabaseAction::set(RegistryItem::key("hkey_users\\x")),
            DatabaseAction::update(RegistryItem::value(
                "hkey_users\\x",
                "v",
                RegistryData::Binary(vec![0, 255]),
            )),
        ]);
        let line = serde_json::to_string(&Envelope::new(1, request.clone())).unwrap();
        assert!(!line.contains('\n'));
        let decoded: Envelope<HostRequest> = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.body, request);
        assert_eq!(decoded.body.operation(), "sync_registry_actions");
    }

    #[test]
    fn responses_carry_tables() {
        let response = HostResponse::FileSystemTable(vec![FileTableEntry::new(
            "c:\\a",
            "d:\\v\\a",
            ResourceKind::File,
        )]);
        let json = serde_json::to_string(&response).unwrap();
        let decoded: HostResponse = serde_json::from_str(&json).unwrap();
        match decoded {
            HostResponse::FileSystemTable(entries) => {
                assert_eq!(entries[0].virtual_identifier(), "d:\\v\\a")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rules_keep_their_fallback() {
        let rules = RuleCollection::default_registry()
            .with_fallback(appvirt_core::VirtualizationType::Virtual);
        let json = serde_json::to_string(&HostResponse::Rules(rules.clone())).unwrap();
        let decoded: HostResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, HostResponse::Rules(rules));
    }
}
