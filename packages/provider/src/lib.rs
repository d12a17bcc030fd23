//! Resource providers for appvirt
//!
//! A provider turns a normalized [`ResourceRequest`](appvirt_core::ResourceRequest)
//! into the identifier the guest should really use, consulting the rule
//! engine and an in-memory table of existing mappings. Every new mapping
//! becomes a [`DatabaseAction`](appvirt_core::DatabaseAction) on a
//! synchronization bus.
//!
//! - [`FileSystemProvider`]: files, directories and libraries
//! - [`RegistryProvider`]: registry keys and values
//! - [`ReleasingProvider`]: stops redirecting after a period of inactivity

pub mod backend;
mod error;
mod filesystem;
pub mod naming;
mod real_registry;
mod registry;
mod release;
mod table;

pub use backend::{FileSystem, HostFileSystem, MemoryFileSystem};
pub use error::{ProviderError, Result};
pub use filesystem::{FileSystemProvider, Outcome, Resolution, ResourceProvider};
pub use naming::VirtualNameGenerator;
pub use real_registry::{MemoryRegistry, RealRegistry};
pub use registry::{KeyHandle, RegistryProvider};
pub use release::{IdleRelease, ReleasingProvider};
pub use table::ResourceTable;
