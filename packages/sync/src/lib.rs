//! Synchronization bus for appvirt
//!
//! Providers emit [`DatabaseAction`](appvirt_core::DatabaseAction)s as they
//! redirect resources. A [`SynchronizationBus`] queues them without
//! blocking the caller and periodically commits them, coalesced into one
//! batch, to an [`ActionSink`]: a local database on the host, or the host's
//! synchronizer when running inside a guest.

mod auto_flush;
mod bus;
mod coalesce;
mod error;
mod sink;

pub use bus::{FlushReport, SynchronizationBus, ESCALATION_THRESHOLD};
pub use coalesce::coalesce;
pub use error::{Result, SyncError};
pub use sink::{ActionSink, LocalSink};
