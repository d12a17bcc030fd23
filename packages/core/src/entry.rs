//! Filesystem table entries.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::row::{Row, TableRow};
use crate::{Error, ResourceKind, Result};

/// A mapping from a real identifier to its virtual identifier.
///
/// Two entries are equal when their real identifiers are equal, whatever
/// their virtual identifiers: a table holds at most one entry per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTableEntry {
    key: String,
    value: String,
    kind: ResourceKind,
}

impl FileTableEntry {
    pub fn new(real: impl Into<String>, virtual_identifier: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            key: real.into(),
            value: virtual_identifier.into(),
            kind,
        }
    }

    /// The case-folded real identifier.
    pub fn real(&self) -> &str {
        &self.key
    }

    /// The identifier the guest is redirected to.
    pub fn virtual_identifier(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// True when the entry redirects nowhere, i.e. a pass-through.
    pub fn is_identity(&self) -> bool {
        self.key == self.value
    }
}

impl PartialEq for FileTableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FileTableEntry {}

impl Hash for FileTableEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl TableRow for FileTableEntry {
    const TABLE: &'static str = "filesystem";

    fn row_key(&self) -> String {
        self.key.clone()
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::new(self.key.clone(), self.value.clone(), self.kind.as_str()))
    }

    fn from_row(row: Row) -> Result<Self> {
        let kind = ResourceKind::parse(&row.kind).ok_or_else(|| Error::MalformedRow {
            table: Self::TABLE,
            key: row.key.clone(),
            message: format!("unknown resource kind '{}'", row.kind),
        })?;
        Ok(Self {
            key: row.key,
            value: row.value,
            kind,
        })
    }
}
