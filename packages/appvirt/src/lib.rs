//! appvirt: application virtualization
//!
//! Redirects an application's file system and registry accesses into a
//! per-application virtual environment. The host owns the persisted state;
//! each guest process loads it at startup, redirects through its providers
//! and streams every mapping it creates back to the host.
//!
//! - [`HostContext`] opens the stores and serves guests
//! - [`GuestContext`] runs inside a guest and answers intercepted calls
//! - [`HookInstaller`] is the seam to whatever patches the real APIs
//!
//! # Example
//!
//! ```rust
//! use appvirt::{GuestOptions, HookCall, HookReply, HostContext};
//! use appvirt_core::{CreationDisposition, EngineConfig};
//! use appvirt_provider::MemoryFileSystem;
//! use std::sync::Arc;
//!
//! let mut config = EngineConfig::default();
//! config.file_system_root = "D:\\Virtual".to_string();
//! config.database.file_system = "Data Source=:memory:;Table=filesystem".to_string();
//! config.database.registry = "Data Source=:memory:;Table=registry".to_string();
//!
//! let host = HostContext::open(config).unwrap();
//! let options = GuestOptions {
//!     file_system: Arc::new(MemoryFileSystem::new()),
//!     ..GuestOptions::default()
//! };
//! let guest = host.spawn_guest(1234, options).unwrap();
//!
//! let reply = guest
//!     .handle(HookCall::CreateFile {
//!         path: "C:\\Temp\\out.log".to_string(),
//!         disposition: CreationDisposition::CreateAlways,
//!     })
//!     .unwrap();
//! assert_eq!(reply, HookReply::Path("D:\\Virtual\\out.log".to_string()));
//! ```

mod error;
mod guest;
mod hooks;
mod host;
mod logging;

pub use error::{AppError, Result};
pub use guest::{GuestContext, GuestOptions};
pub use hooks::{HookCall, HookHandler, HookInstaller, HookReply, HookTable, InterceptedApi};
pub use host::HostContext;
pub use logging::{init_logging, LOG_ENV};
