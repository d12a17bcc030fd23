//! Core appvirt: the shared vocabulary of the virtualization engine
//!
//! Every other crate in the workspace speaks in terms of these types:
//! - `ResourceRequest`: a normalized, immutable description of an intercepted access
//! - `RuleCollection`: ordered virtualization rules with wildcard matching
//! - `DatabaseAction`: one table mutation on its way to persistent storage
//! - `FileTableEntry` / `RegistryItem`: the rows of the two persisted tables
//! - `TableRow`: how an item maps onto a flat `(key, value, kind)` row
//!
//! # Example
//!
//! ```rust
//! use appvirt_core::{CreationDisposition, ResourceKind, ResourceRequest, RuleCollection, VirtualizationType};
//!
//! let rules = RuleCollection::default_registry();
//! let request = ResourceRequest::registry("HKCU\\Software\\Vendor", CreationDisposition::OpenExisting);
//! assert_eq!(rules.resolve(request.identifier()), VirtualizationType::VirtualWithFallback);
//! ```

mod action;
pub mod config;
mod entry;
mod error;
mod gate;
pub mod registry;
mod report;
mod request;
pub mod rules;
mod row;

pub use action::{ActionType, DatabaseAction};
pub use config::{DatabaseConfig, EngineConfig};
pub use entry::FileTableEntry;
pub use error::{Error, Result};
pub use gate::{AlwaysOpen, RedirectionGate};
pub use registry::{RegistryData, RegistryItem, RegistryValueKind};
pub use report::{LogLevel, LogMessage, ReportSink, TracingReportSink};
pub use request::{CreationDisposition, RequestNormalizer, ResourceKind, ResourceRequest};
pub use row::{Row, TableRow};
pub use rules::{RuleCollection, RulePattern, VirtualizationRule, VirtualizationType};
