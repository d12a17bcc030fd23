//! Host-side bookkeeping of the channels published for guest processes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::channel::{ChannelServer, ChannelTransport};
use crate::error::{ConnectionError, Result};
use crate::roles::HostRoles;

/// Prefix of every guest channel name.
pub const CHANNEL_PREFIX: &str = "appvirt";

/// The channel name a guest with `process_id` connects to.
pub fn channel_name(process_id: u32) -> String {
    format!("{}.{}", CHANNEL_PREFIX, process_id)
}

/// One channel per guest process, all served by the same host roles.
pub struct GuestRegistry {
    roles: Arc<dyn HostRoles>,
    channels: Mutex<BTreeMap<String, ChannelServer>>,
}

impl GuestRegistry {
    pub fn new(roles: Arc<dyn HostRoles>) -> Self {
        Self {
            roles,
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    /// Publish the channel for `process_id`; returns its name. Publishing
    /// an already published process is a no-op.
    pub fn publish(&self, process_id: u32) -> Result<String> {
        let name = channel_name(process_id);
        let mut channels = self.channels.lock();
        if !channels.contains_key(&name) {
            let server = ChannelServer::spawn(name.clone(), self.roles.clone())?;
            channels.insert(name.clone(), server);
        }
        Ok(name)
    }

    /// Client end of a published channel.
    pub fn connect(&self, process_id: u32) -> Result<ChannelTransport> {
        let name = channel_name(process_id);
        self.channels
            .lock()
            .get(&name)
            .map(ChannelServer::client)
            .ok_or(ConnectionError::UnknownChannel { name })
    }

    /// Stop serving `process_id`. Returns false if nothing was published.
    pub fn retire(&self, process_id: u32) -> bool {
        let removed = self.channels.lock().remove(&channel_name(process_id));
        match removed {
            Some(mut server) => {
                server.stop();
                info!(channel = %server.name(), "channel retired");
                true
            }
            None => false,
        }
    }

    /// Names of all published channels, sorted.
    pub fn published(&self) -> Vec<String> {
        self.channels.lock().keys().cloned().collect()
    }
}
