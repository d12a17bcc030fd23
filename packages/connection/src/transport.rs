//! The request/response seam between a guest and its host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{HostRequest, HostResponse};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Correlation id for the next outgoing request.
pub(crate) fn next_request_id() -> u64 {
    REQUEST_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Carries one request to the host and waits for its reply.
pub trait Transport: Send + Sync {
    /// Send `request` and wait at most `timeout` for the answer.
    fn call(&self, request: HostRequest, timeout: Duration) -> Result<HostResponse>;
}
