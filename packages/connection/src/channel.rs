//! In-process transport over std channels.
//!
//! A [`ChannelServer`] owns one thread that answers requests in arrival
//! order. Each call carries its own reply channel, so a reply that arrives
//! after its caller gave up is simply dropped.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{ConnectionError, Result};
use crate::protocol::{Envelope, HostRequest, HostResponse};
use crate::roles::HostRoles;
use crate::service::dispatch;
use crate::transport::{next_request_id, Transport};

enum Message {
    Call {
        request: Envelope<HostRequest>,
        reply: Sender<Envelope<HostResponse>>,
    },
    Stop,
}

/// Serves one named channel on a background thread.
pub struct ChannelServer {
    name: String,
    sender: Sender<Message>,
    thread: Option<JoinHandle<()>>,
}

impl ChannelServer {
    pub fn spawn(name: impl Into<String>, roles: Arc<dyn HostRoles>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("appvirt-channel-{}", name))
            .spawn(move || {
                for message in receiver {
                    match message {
                        Message::Call { request, reply } => {
                            let id = request.id;
                            let body = dispatch(roles.as_ref(), request.body);
                            // The caller may have timed out and left.
                            let _ = reply.send(Envelope::new(id, body));
                        }
                        Message::Stop => break,
                    }
                }
            })?;
        info!(channel = %name, "channel published");
        Ok(Self {
            name,
            sender,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A new client end of this channel.
    pub fn client(&self) -> ChannelTransport {
        ChannelTransport {
            sender: Mutex::new(self.sender.clone()),
        }
    }

    /// Stop serving. Requests still queued are dropped; their callers see
    /// [`ConnectionError::Closed`].
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.sender.send(Message::Stop);
            let _ = thread.join();
            debug!(channel = %self.name, "channel stopped");
        }
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Client end of a [`ChannelServer`].
pub struct ChannelTransport {
    sender: Mutex<Sender<Message>>,
}

impl Clone for ChannelTransport {
    fn clone(&self) -> Self {
        Self {
            sender: Mutex::new(self.sender.lock().clone()),
        }
    }
}

impl Transport for ChannelTransport {
    fn call(&self, request: HostRequest, timeout: Duration) -> Result<HostResponse> {
        let operation = request.operation();
        let (reply, response) = mpsc::channel();
        self.sender
            .lock()
            .send(Message::Call {
                request: Envelope::new(next_request_id(), request),
                reply,
            })
            .map_err(|_| ConnectionError::Closed)?;

        match response.recv_timeout(timeout) {
            Ok(envelope) => Ok(envelope.body),
            Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout { operation, timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appvirt_core::{
        DatabaseAction, FileTableEntry, LogLevel, LogMessage, RegistryItem, RuleCollection,
    };

    use crate::roles::{Reporter, ResourceLoader, Synchronizer};

    /// A host whose ping takes `delay`.
    struct Sluggish {
        delay: Duration,
    }

    impl ResourceLoader for Sluggish {
        fn file_system_root(&self) -> Result<String> {
            Ok("D:\\Virtual".to_string())
        }
        fn load_file_system_table(&self) -> Result<Vec<FileTableEntry>> {
            Ok(Vec::new())
        }
        fn load_registry(&self) -> Result<Vec<RegistryItem>> {
            Ok(Vec::new())
        }
        fn file_system_rules(&self) -> Result<RuleCollection> {
            Ok(RuleCollection::new())
        }
        fn registry_rules(&self) -> Result<RuleCollection> {
            Ok(RuleCollection::default_registry())
        }
    }

    impl Synchronizer for Sluggish {
        fn sync_file_system_actions(&self, actions: Vec<DatabaseAction<FileTableEntry>>) -> Result<usize> {
            Ok(actions.len())
        }
        fn sync_registry_actions(&self, _actions: Vec<DatabaseAction<RegistryItem>>) -> Result<usize> {
            Err(ConnectionError::Remote {
                message: "registry is read-only".to_string(),
            })
        }
    }

    impl Reporter for Sluggish {
        fn ping(&self) -> Result<()> {
            std::thread::sleep(self.delay);
            Ok(())
        }
        fn report_message(&self, _message: LogMessage) -> Result<()> {
            Ok(())
        }
        fn report_messages(&self, _messages: Vec<LogMessage>) -> Result<()> {
            Ok(())
        }
        fn required_log_level(&self) -> Result<LogLevel> {
            Ok(LogLevel::Info)
        }
    }

    fn server(delay: Duration) -> ChannelServer {
        ChannelServer::spawn("test", Arc::new(Sluggish { delay })).unwrap()
    }

    #[test]
    fn round_trip() {
        let server = server(Duration::ZERO);
        let client = server.client();
        assert_eq!(
            client.call(HostRequest::Ping, Duration::from_secs(5)).unwrap(),
            HostResponse::Pong
        );
        assert_eq!(
            client
                .call(HostRequest::SyncRegistryActions(Vec::new()), Duration::from_secs(5))
                .unwrap(),
            HostResponse::Error("host error: registry is read-only".to_string())
        );
    }

    #[test]
    fn slow_host_times_out() {
        let server = server(Duration::from_millis(300));
        let err = server
            .client()
            .call(HostRequest::Ping, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout { operation: "ping", .. }));
    }

    #[test]
    fn stopped_channel_is_closed() {
        let mut server = server(Duration::ZERO);
        let client = server.client();
        server.stop();
        assert!(matches!(
            client.call(HostRequest::Ping, Duration::from_secs(1)),
            Err(ConnectionError::Closed)
        ));
    }
}
