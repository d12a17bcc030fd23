//! The in-memory real-to-virtual mapping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use appvirt_core::FileTableEntry;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{ProviderError, Result};

/// How often a proposal may lose its virtual identifier to a concurrent
/// creator before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 16;

#[derive(Default)]
struct TableState {
    entries: HashMap<String, FileTableEntry>,
    /// Case-folded virtual identifiers in use or reserved by a claim.
    virtuals: HashSet<String>,
    /// Keys whose first entry is still being prepared.
    claims: HashMap<String, Arc<Claim>>,
}

impl TableState {
    fn insert(&mut self, entry: FileTableEntry) -> Option<FileTableEntry> {
        let replaced = self.remove(entry.real());
        self.virtuals.insert(entry.virtual_identifier().to_lowercase());
        self.entries.insert(entry.real().to_string(), entry);
        replaced
    }

    fn remove(&mut self, real: &str) -> Option<FileTableEntry> {
        let removed = self.entries.remove(real)?;
        self.virtuals
            .remove(&removed.virtual_identifier().to_lowercase());
        Some(removed)
    }
}

#[derive(Default)]
struct Claim {
    done: Mutex<bool>,
    settled: Condvar,
}

impl Claim {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.settled.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.settled.notify_all();
    }
}

/// Releases a claim however its creator leaves, dropping the reservation
/// if the entry was never committed.
struct ClaimGuard<'a> {
    state: &'a RwLock<TableState>,
    real: &'a str,
    reserved: String,
    claim: Arc<Claim>,
    committed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut state = self.state.write();
            state.claims.remove(self.real);
            state.virtuals.remove(&self.reserved);
        }
        self.claim.finish();
    }
}

/// Entries keyed by case-folded real identifier.
///
/// Lookups take a shared lock. Inserts and removals take the exclusive lock
/// only for the map update and the caller's `commit` callback, which is
/// where mutations are published; publishing under the lock keeps every
/// key's actions in the order its mutations happened.
///
/// Creating an entry is a three-step claim: propose a virtual identifier
/// with no lock held, reserve it, prepare the resource with no lock held,
/// then commit. Anyone asking for a claimed key waits until the claim
/// settles, so nobody sees an entry whose resource is not ready yet.
#[derive(Default)]
pub struct ResourceTable {
    state: RwLock<TableState>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding `entries`. Later duplicates of a key win.
    pub fn from_entries(entries: impl IntoIterator<Item = FileTableEntry>) -> Self {
        let mut state = TableState::default();
        for entry in entries {
            state.insert(entry);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// The entry for `real`, waiting for a pending creation to settle.
    pub fn get(&self, real: &str) -> Option<FileTableEntry> {
        loop {
            let claim = {
                let state = self.state.read();
                if let Some(entry) = state.entries.get(real) {
                    return Some(entry.clone());
                }
                state.claims.get(real)?.clone()
            };
            claim.wait();
        }
    }

    /// True if some entry already redirects to `virtual_identifier`, or a
    /// pending creation has reserved it.
    pub fn is_virtual_taken(&self, virtual_identifier: &str) -> bool {
        self.state
            .read()
            .virtuals
            .contains(&virtual_identifier.to_lowercase())
    }

    /// Return the entry for `real`, creating it if absent.
    ///
    /// `propose` builds a candidate entry and runs with no lock held; a
    /// candidate whose virtual identifier was taken in the meantime is
    /// proposed again. `prepare` readies the resource behind the winning
    /// candidate, also with no lock held, and `commit` runs under the
    /// exclusive lock as the entry is inserted. When several threads race
    /// on one key, exactly one prepares and commits; the others wait and
    /// get its entry.
    ///
    /// The second element is `prepare`'s result for the creating caller and
    /// `None` for everyone else.
    pub fn get_or_create<O>(
        &self,
        real: &str,
        propose: impl Fn() -> Result<FileTableEntry>,
        prepare: impl FnOnce(&FileTableEntry) -> O,
        commit: impl FnOnce(&FileTableEntry),
    ) -> Result<(FileTableEntry, Option<O>)> {
        let mut lost = 0;
        let (candidate, mut guard) = loop {
            if let Some(entry) = self.get(real) {
                return Ok((entry, None));
            }
            let candidate = propose()?;

            let mut state = self.state.write();
            if let Some(entry) = state.entries.get(real) {
                return Ok((entry.clone(), None));
            }
            if let Some(claim) = state.claims.get(real).cloned() {
                drop(state);
                claim.wait();
                continue;
            }
            let reserved = candidate.virtual_identifier().to_lowercase();
            if state.virtuals.contains(&reserved) {
                drop(state);
                lost += 1;
                if lost == MAX_CLAIM_ATTEMPTS {
                    return Err(ProviderError::NameExhausted {
                        identifier: real.to_string(),
                        attempts: lost,
                    });
                }
                continue;
            }

            let claim = Arc::new(Claim::default());
            state.virtuals.insert(reserved.clone());
            state.claims.insert(real.to_string(), claim.clone());
            break (
                candidate,
                ClaimGuard {
                    state: &self.state,
                    real,
                    reserved,
                    claim,
                    committed: false,
                },
            );
        };

        let prepared = prepare(&candidate);

        let mut state = self.state.write();
        state.claims.remove(real);
        state.insert(candidate.clone());
        commit(&candidate);
        drop(state);
        guard.committed = true;
        drop(guard);

        Ok((candidate, Some(prepared)))
    }

    /// Remove the entry for `real`. `commit` runs under the exclusive lock
    /// with the removed entry.
    pub fn remove_with(
        &self,
        real: &str,
        commit: impl FnOnce(&FileTableEntry),
    ) -> Option<FileTableEntry> {
        let mut state = self.settled_write(&[real]);
        let removed = state.remove(real)?;
        commit(&removed);
        Some(removed)
    }

    /// Move the entry of `from` to the key `to`, keeping its virtual
    /// identifier and replacing whatever `to` mapped to. `commit` runs under
    /// the exclusive lock with the old entry and the moved one.
    pub fn rename_with(
        &self,
        from: &str,
        to: &str,
        commit: impl FnOnce(&FileTableEntry, &FileTableEntry),
    ) -> Option<FileTableEntry> {
        let mut state = self.settled_write(&[from, to]);
        let old = state.remove(from)?;
        let moved = FileTableEntry::new(to, old.virtual_identifier(), old.kind());
        state.insert(moved.clone());
        commit(&old, &moved);
        Some(moved)
    }

    /// Snapshot of every entry, in no particular order.
    pub fn entries(&self) -> Vec<FileTableEntry> {
        self.state.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The exclusive lock, taken once none of `keys` has a pending claim.
    fn settled_write(&self, keys: &[&str]) -> parking_lot::RwLockWriteGuard<'_, TableState> {
        loop {
            let state = self.state.write();
            let pending = keys.iter().find_map(|key| state.claims.get(*key).cloned());
            match pending {
                None => return state,
                Some(claim) => {
                    drop(state);
                    claim.wait();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use appvirt_core::ResourceKind;

    fn entry(real: &str, virtual_identifier: &str) -> FileTableEntry {
        FileTableEntry::new(real, virtual_identifier, ResourceKind::File)
    }

    #[test]
    fn get_or_create_prepares_once() {
        let table = ResourceTable::new();
        let (first, prepared) = table
            .get_or_create("c:\\a", || Ok(entry("c:\\a", "v:\\a")), |_| "ready", |_| {})
            .unwrap();
        assert_eq!(prepared, Some("ready"));

        let (second, prepared) = table
            .get_or_create(
                "c:\\a",
                || panic!("must not propose"),
                |_| "again",
                |_| panic!("must not commit"),
            )
            .unwrap();
        assert_eq!(prepared, None);
        assert_eq!(first.virtual_identifier(), second.virtual_identifier());
    }

    #[test]
    fn waiters_see_the_entry_only_after_it_is_prepared() {
        let table = ResourceTable::new();
        let ready = AtomicUsize::new(0);
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                table
                    .get_or_create(
                        "c:\\a",
                        || Ok(entry("c:\\a", "v:\\a")),
                        |_| {
                            barrier.wait();
                            thread::sleep(Duration::from_millis(150));
                            ready.store(1, Ordering::SeqCst);
                        },
                        |_| {},
                    )
                    .unwrap();
            });
            barrier.wait();
            thread::sleep(Duration::from_millis(20));
            let seen = table.get("c:\\a").unwrap();
            assert_eq!(ready.load(Ordering::SeqCst), 1);
            assert_eq!(seen.virtual_identifier(), "v:\\a");
        });
    }

    #[test]
    fn reservations_are_visible_while_preparing() {
        let table = ResourceTable::from_entries([entry("c:\\a", "V:\\A")]);
        assert!(table.is_virtual_taken("v:\\a"));
        table
            .get_or_create(
                "c:\\b",
                || Ok(entry("c:\\b", "v:\\b")),
                |_| assert!(table.is_virtual_taken("V:\\B")),
                |_| {},
            )
            .unwrap();
        assert!(table.is_virtual_taken("v:\\b"));
    }

    #[test]
    fn a_taken_candidate_is_proposed_again() {
        let table = ResourceTable::from_entries([entry("c:\\a", "v:\\x")]);
        let proposals = AtomicUsize::new(0);
        let (created, _) = table
            .get_or_create(
                "c:\\b",
                || {
                    // The first proposal ignores the reverse index.
                    let name = match proposals.fetch_add(1, Ordering::SeqCst) {
                        0 => "v:\\x",
                        _ => "v:\\y",
                    };
                    Ok(entry("c:\\b", name))
                },
                |_| {},
                |_| {},
            )
            .unwrap();
        assert_eq!(created.virtual_identifier(), "v:\\y");
        assert_eq!(proposals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_proposal_inserts_nothing() {
        let table = ResourceTable::new();
        let result = table.get_or_create(
            "c:\\a",
            || {
                Err(ProviderError::NameExhausted {
                    identifier: "c:\\a".to_string(),
                    attempts: 16,
                })
            },
            |_| {},
            |_| {},
        );
        assert!(result.is_err());
        assert!(table.get("c:\\a").is_none());
    }

    #[test]
    fn a_panicking_prepare_releases_the_claim() {
        let table = ResourceTable::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            table.get_or_create(
                "c:\\a",
                || Ok(entry("c:\\a", "v:\\a")),
                |_| panic!("copy blew up"),
                |_| {},
            )
        }));
        assert!(outcome.is_err());
        assert!(table.get("c:\\a").is_none());
        assert!(!table.is_virtual_taken("v:\\a"));
    }

    #[test]
    fn remove_frees_the_virtual_identifier() {
        let table = ResourceTable::from_entries([entry("c:\\a", "v:\\a")]);
        let mut committed = Vec::new();
        let removed = table
            .remove_with("c:\\a", |e| committed.push(e.real().to_string()))
            .unwrap();
        assert_eq!(removed.virtual_identifier(), "v:\\a");
        assert_eq!(committed, ["c:\\a"]);
        assert!(!table.is_virtual_taken("v:\\a"));
        assert!(table.is_empty());
        assert!(table.remove_with("c:\\a", |_| panic!("nothing to remove")).is_none());
    }

    #[test]
    fn rename_replaces_the_destination() {
        let table = ResourceTable::from_entries([entry("c:\\a", "v:\\1"), entry("c:\\b", "v:\\2")]);
        let moved = table
            .rename_with("c:\\a", "c:\\b", |old, moved| {
                assert_eq!(old.real(), "c:\\a");
                assert_eq!(moved.real(), "c:\\b");
            })
            .unwrap();
        assert_eq!(moved.virtual_identifier(), "v:\\1");
        assert!(!table.is_virtual_taken("v:\\2"));
        assert!(table.is_virtual_taken("v:\\1"));
        assert_eq!(table.len(), 1);
        assert!(table.rename_with("c:\\a", "c:\\c", |_, _| {}).is_none());
    }
}
