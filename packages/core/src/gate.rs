//! The seam providers consult before redirecting anything.

/// Decides whether redirection may proceed.
///
/// A guest connected to its host keeps the gate open. Once the connection
/// is lost the gate closes and providers refuse to redirect, so the guest
/// never builds up virtual state the host has not recorded.
pub trait RedirectionGate: Send + Sync {
    fn is_open(&self) -> bool;
}

/// A gate that never closes, for host-side providers and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOpen;

impl RedirectionGate for AlwaysOpen {
    fn is_open(&self) -> bool {
        true
    }
}
