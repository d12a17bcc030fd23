//! Process connection layer for appvirt
//!
//! A guest process never touches the stores. Everything it needs comes
//! from its host through three role contracts:
//! - [`ResourceLoader`]: root, rules and the persisted tables at startup
//! - [`Synchronizer`]: the guest's table mutations on their way to the store
//! - [`Reporter`]: liveness pings and log forwarding
//!
//! [`HostService`] implements the roles on the host. Guests reach it through
//! a [`Transport`]: an in-process [`ChannelTransport`] or a [`TcpTransport`]
//! carrying one JSON envelope per line. [`ProcessConnection`] tracks a
//! guest's connection state and doubles as its redirection gate.

mod channel;
mod client;
mod connection;
mod error;
mod forward;
mod guests;
pub mod protocol;
mod roles;
mod service;
mod tcp;
mod transport;

pub use channel::{ChannelServer, ChannelTransport};
pub use client::RemoteHost;
pub use connection::{ConnectionState, GuestBootstrap, ProcessConnection, SessionId};
pub use error::{ConnectionError, Result};
pub use forward::{ForwardingReportSink, SynchronizerSink, MAX_BUFFERED_REPORTS};
pub use guests::{channel_name, GuestRegistry, CHANNEL_PREFIX};
pub use roles::{HostRoles, Reporter, ResourceLoader, Synchronizer};
pub use service::{dispatch, HostService, HostTable};
pub use tcp::{TcpServer, TcpTransport};
pub use transport::Transport;
