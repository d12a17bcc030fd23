//! The flat row shape shared by every persisted table.

use crate::Result;

/// A persisted `(key, value, kind)` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    pub key: String,
    pub value: String,
    pub kind: String,
}

impl Row {
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: kind.into(),
        }
    }
}

/// An item that can be stored as a single table row.
///
/// `row_key` must be consistent with `to_row().key`; stores and buses use
/// it to order and coalesce actions without encoding the whole item.
pub trait TableRow: Clone + Send + Sync + 'static {
    /// Default table name for items of this type.
    const TABLE: &'static str;

    /// The primary key of the row this item occupies.
    fn row_key(&self) -> String;

    /// Encode the item as a row.
    fn to_row(&self) -> Result<Row>;

    /// Decode an item from a row read back from a store.
    fn from_row(row: Row) -> Result<Self>;
}
