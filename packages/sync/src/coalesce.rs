//! Collapsing a batch of actions into at most one action per row key.

use std::collections::HashMap;

use appvirt_core::{ActionType, DatabaseAction, TableRow};

/// Reduce `actions` to one action per row key with the same net effect as
/// applying them one by one.
///
/// The result keeps the order in which each key first appears. Keys are
/// independent rows, so reordering across keys never changes the outcome.
pub fn coalesce<T: TableRow>(actions: &[DatabaseAction<T>]) -> Vec<DatabaseAction<T>> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(actions.len());
    let mut merged: Vec<DatabaseAction<T>> = Vec::with_capacity(actions.len());

    for action in actions {
        match slots.get(&action.item().row_key()) {
            Some(&slot) => {
                if let Some(combined) = combine(&merged[slot], action) {
                    merged[slot] = combined;
                }
            }
            None => {
                slots.insert(action.item().row_key(), merged.len());
                merged.push(action.clone());
            }
        }
    }
    merged
}

/// The single action equivalent to `earlier` followed by `later`, or
/// `None` when `later` changes nothing.
fn combine<T: TableRow>(
    earlier: &DatabaseAction<T>,
    later: &DatabaseAction<T>,
) -> Option<DatabaseAction<T>> {
    match (earlier.action_type(), later.action_type()) {
        // The row exists after a Set, so the update lands on it.
        (ActionType::Set, ActionType::Update) => Some(DatabaseAction::set(later.item().clone())),
        // Updating a removed row is a no-op.
        (ActionType::Remove, ActionType::Update) => None,
        _ => Some(later.clone()),
    }
}
