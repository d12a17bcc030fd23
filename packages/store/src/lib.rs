//! Persistent tables for appvirt
//!
//! Each resource kind is stored as one flat `(key, value, kind)` table. A
//! [`Database`] stages typed [`DatabaseAction`](appvirt_core::DatabaseAction)s
//! as parameterized statements and commits them in one atomic batch through
//! a swappable [`StoreBackend`]:
//! - `SqliteBackend`: a SQLite file (or `:memory:`), one transaction per batch
//! - `MemoryBackend`: a shared in-process map, used by tests and dry runs

mod backend;
mod connection_string;
mod database;
mod error;
mod memory;
pub mod query;
mod sqlite;

pub use backend::StoreBackend;
pub use connection_string::{ConnectionString, MEMORY_DATA_SOURCE};
pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use query::{Command, Operation, ParameterGenerator, QueryBuilder, Statement};
pub use sqlite::SqliteBackend;
