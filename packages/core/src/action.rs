//! Database actions: one table mutation on its way to a store.

use serde::{Deserialize, Serialize};

/// What a [`DatabaseAction`] does to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Insert the row, replacing any existing row with the same key.
    Set,
    /// Replace the value and kind of an existing row; no-op if absent.
    Update,
    /// Delete the row; no-op if absent.
    Remove,
}

/// An immutable record of one mutation of a resource table.
///
/// Actions are emitted by providers, queued on a synchronization bus and
/// applied to a store in submission order per row key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseAction<T> {
    item: T,
    action_type: ActionType,
}

impl<T> DatabaseAction<T> {
    pub fn new(item: T, action_type: ActionType) -> Self {
        Self { item, action_type }
    }

    pub fn set(item: T) -> Self {
        Self::new(item, ActionType::Set)
    }

    pub fn update(item: T) -> Self {
        Self::new(item, ActionType::Update)
    }

    pub fn remove(item: T) -> Self {
        Self::new(item, ActionType::Remove)
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn into_item(self) -> T {
        self.item
    }
}
