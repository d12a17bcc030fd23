//! Registry redirection.
//!
//! The provider keeps a virtual registry of keys and values. How a key
//! relates to the real registry depends on its virtualization type:
//!
//! - `Transparent`: every operation goes to the real registry.
//! - `TransparentRead`: reads fall back to the real registry; writes land
//!   in the virtual registry.
//! - `VirtualWithFallback`: a real key is copied, values included, into the
//!   virtual registry when first opened; from then on only the copy is used.
//! - `Virtual`: the real registry is never consulted.
//!
//! Deleting a key or value that the real registry would still supply
//! leaves a tombstone, persisted like any other row, that keeps it hidden.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use appvirt_core::{
    AlwaysOpen, CreationDisposition, DatabaseAction, RedirectionGate, RegistryData,
    RegistryItem, ResourceRequest, RuleCollection, VirtualizationType,
};
use appvirt_sync::SynchronizationBus;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, Result};
use crate::real_registry::{MemoryRegistry, RealRegistry};

// Zero is never handed out so callers can use it as "no handle".
static KEY_HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A process-unique handle to an open key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHandle(u64);

impl KeyHandle {
    fn next() -> Self {
        KeyHandle(KEY_HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    pub fn from_raw(raw: u64) -> Self {
        KeyHandle(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone)]
struct OpenKey {
    path: String,
    virtualization_type: VirtualizationType,
}

#[derive(Default)]
struct VirtualRegistry {
    keys: BTreeMap<String, BTreeMap<String, RegistryData>>,
    /// Real keys deleted through the virtual registry.
    deleted_keys: BTreeSet<String>,
    /// Real values deleted through the virtual registry, by key path.
    deleted_values: BTreeMap<String, BTreeSet<String>>,
}

impl VirtualRegistry {
    fn value(&self, path: &str, name: &str) -> Option<RegistryData> {
        self.keys.get(path)?.get(name).cloned()
    }

    /// True if the real value must stay hidden.
    fn is_value_deleted(&self, path: &str, name: &str) -> bool {
        self.deleted_keys.contains(path)
            || self
                .deleted_values
                .get(path)
                .is_some_and(|names| names.contains(name))
    }
}

/// Redirects registry keys and values into a virtual registry.
///
/// Every mutation is queued on the bus while the virtual registry is still
/// locked, so actions on one row reach the bus in the order they happened.
pub struct RegistryProvider {
    rules: RuleCollection,
    state: RwLock<VirtualRegistry>,
    handles: RwLock<HashMap<KeyHandle, OpenKey>>,
    real: Arc<dyn RealRegistry>,
    gate: Arc<dyn RedirectionGate>,
    bus: Arc<SynchronizationBus<RegistryItem>>,
}

impl RegistryProvider {
    pub fn new(rules: RuleCollection, bus: Arc<SynchronizationBus<RegistryItem>>) -> Self {
        Self {
            rules,
            state: RwLock::new(VirtualRegistry::default()),
            handles: RwLock::new(HashMap::new()),
            real: Arc::new(MemoryRegistry::new()),
            gate: Arc::new(AlwaysOpen),
            bus,
        }
    }

    pub fn with_real_registry(mut self, real: Arc<dyn RealRegistry>) -> Self {
        self.real = real;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn RedirectionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Preload keys, values and tombstones read back from the store. No
    /// actions are emitted.
    pub fn with_items(self, items: impl IntoIterator<Item = RegistryItem>) -> Self {
        {
            let mut state = self.state.write();
            for item in items {
                match item {
                    RegistryItem::Key { path } => {
                        state.keys.entry(path).or_default();
                    }
                    RegistryItem::Value {
                        key_path,
                        name,
                        data,
                    } => {
                        state.keys.entry(key_path).or_default().insert(name, data);
                    }
                    RegistryItem::Tombstone {
                        key_path,
                        name: None,
                    } => {
                        state.deleted_keys.insert(key_path);
                    }
                    RegistryItem::Tombstone {
                        key_path,
                        name: Some(name),
                    } => {
                        state.deleted_values.entry(key_path).or_default().insert(name);
                    }
                }
            }
        }
        self
    }

    pub fn rules(&self) -> &RuleCollection {
        &self.rules
    }

    /// Number of keys in the virtual registry.
    pub fn key_count(&self) -> usize {
        self.state.read().keys.len()
    }

    pub fn open_handles(&self) -> usize {
        self.handles.read().len()
    }

    /// The normalized path behind an open handle.
    pub fn key_path(&self, handle: KeyHandle) -> Result<String> {
        Ok(self.open_key_info(handle)?.path)
    }

    /// Open (or, with a creating disposition, create) a key.
    pub fn open_key(&self, path: &str, disposition: CreationDisposition) -> Result<KeyHandle> {
        self.ensure_open()?;
        let request = ResourceRequest::registry(path, disposition);
        if request.is_empty() {
            return Err(ProviderError::KeyNotFound {
                path: path.to_string(),
            });
        }
        let key = request.identifier().to_string();
        let virtualization_type = self.virtualization_type(&key);
        let not_found = || ProviderError::KeyNotFound { path: key.clone() };

        if virtualization_type == VirtualizationType::Transparent {
            if !self.real.key_exists(&key) {
                if !disposition.allows_creation() {
                    return Err(not_found());
                }
                self.real.create_key(&key)?;
            }
        } else {
            let real_exists = virtualization_type != VirtualizationType::Virtual
                && self.real.key_exists(&key);
            let mut state = self.state.write();
            let real_visible = real_exists && !state.deleted_keys.contains(&key);
            match virtualization_type {
                _ if state.keys.contains_key(&key) => {}
                VirtualizationType::VirtualWithFallback if real_visible => {
                    self.copy_real_key(&mut state, &key);
                }
                // Read through to the real key until something is written.
                VirtualizationType::TransparentRead if real_visible => {}
                _ if disposition.allows_creation() => {
                    self.create_virtual_key(&mut state, &key);
                }
                _ => return Err(not_found()),
            }
        }

        let handle = KeyHandle::next();
        self.handles.write().insert(
            handle,
            OpenKey {
                path: key,
                virtualization_type,
            },
        );
        trace!(%handle, path = request.identifier(), "opened key");
        Ok(handle)
    }

    pub fn close_key(&self, handle: KeyHandle) -> Result<()> {
        self.handles
            .write()
            .remove(&handle)
            .map(|_| ())
            .ok_or(ProviderError::InvalidHandle {
                handle: handle.as_raw(),
            })
    }

    pub fn query_value(&self, handle: KeyHandle, name: &str) -> Result<RegistryData> {
        self.ensure_open()?;
        let open = self.open_key_info(handle)?;
        let name = name.to_lowercase();

        let found = match open.virtualization_type {
            VirtualizationType::Transparent => self.real.query_value(&open.path, &name),
            VirtualizationType::TransparentRead => {
                let (virtual_data, deleted) = {
                    let state = self.state.read();
                    (
                        state.value(&open.path, &name),
                        state.is_value_deleted(&open.path, &name),
                    )
                };
                match virtual_data {
                    Some(data) => Some(data),
                    None if deleted => None,
                    None => self.real.query_value(&open.path, &name),
                }
            }
            _ => self.state.read().value(&open.path, &name),
        };
        found.ok_or(ProviderError::ValueNotFound {
            key: open.path,
            name,
        })
    }

    /// Set a value. A new value emits `Set`, an overwrite emits `Update`.
    pub fn set_value(&self, handle: KeyHandle, name: &str, data: RegistryData) -> Result<()> {
        self.ensure_open()?;
        let open = self.open_key_info(handle)?;
        let name = name.to_lowercase();

        if open.virtualization_type == VirtualizationType::Transparent {
            return self.real.set_value(&open.path, &name, data);
        }

        let mut state = self.state.write();
        self.create_virtual_key(&mut state, &open.path);
        let previous = state
            .keys
            .entry(open.path.clone())
            .or_default()
            .insert(name.clone(), data.clone());
        if let Some(names) = state.deleted_values.get_mut(&open.path) {
            names.remove(&name);
        }

        let item = RegistryItem::value(open.path, name, data);
        debug!(value = %item, overwrite = previous.is_some(), "set value");
        self.bus.enqueue(match previous {
            Some(_) => DatabaseAction::update(item),
            None => DatabaseAction::set(item),
        });
        Ok(())
    }

    /// Delete a value. Returns false if there was no value to delete.
    ///
    /// Under `TransparentRead` a real value is hidden by a tombstone, so it
    /// does not reappear on the next read.
    pub fn delete_value(&self, handle: KeyHandle, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let open = self.open_key_info(handle)?;
        let name = name.to_lowercase();

        if open.virtualization_type == VirtualizationType::Transparent {
            return self.real.delete_value(&open.path, &name);
        }
        let real_has = open.virtualization_type == VirtualizationType::TransparentRead
            && self.real.query_value(&open.path, &name).is_some();

        let mut state = self.state.write();
        let removed = state
            .keys
            .get_mut(&open.path)
            .and_then(|values| values.remove(&name));

        if real_has && !state.is_value_deleted(&open.path, &name) {
            state
                .deleted_values
                .entry(open.path.clone())
                .or_default()
                .insert(name.clone());
            let item = RegistryItem::tombstone(open.path, Some(name));
            debug!(value = %item, "hid real value");
            self.bus.enqueue(DatabaseAction::set(item));
            return Ok(true);
        }
        match removed {
            Some(data) => {
                let item = RegistryItem::value(open.path, name, data);
                debug!(value = %item, "deleted value");
                self.bus.enqueue(DatabaseAction::remove(item));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the key behind `handle` along with its values. The handle
    /// stays open until closed.
    ///
    /// A real key that `TransparentRead` or `VirtualWithFallback` would
    /// otherwise read from is hidden by a tombstone, so it is neither read
    /// through nor copied again.
    pub fn delete_key(&self, handle: KeyHandle) -> Result<bool> {
        self.ensure_open()?;
        let open = self.open_key_info(handle)?;
        let path = open.path;

        let real_exists = match open.virtualization_type {
            VirtualizationType::Transparent => return self.real.delete_key(&path),
            VirtualizationType::Virtual => false,
            _ => self.real.key_exists(&path),
        };
        // Under TransparentRead a recreated key would read through again.
        let real_values: Vec<String> =
            if real_exists && open.virtualization_type == VirtualizationType::TransparentRead {
                self.real.values(&path).into_iter().map(|(name, _)| name).collect()
            } else {
                Vec::new()
            };

        let mut state = self.state.write();
        let removed = state.keys.remove(&path);
        let hide_real = real_exists && !state.deleted_keys.contains(&path);
        if removed.is_none() && !hide_real {
            return Ok(false);
        }

        let mut actions: Vec<DatabaseAction<RegistryItem>> = removed
            .unwrap_or_default()
            .into_iter()
            .filter(|(name, _)| !(hide_real && real_values.contains(name)))
            .map(|(name, data)| DatabaseAction::remove(RegistryItem::value(&path, name, data)))
            .collect();
        if hide_real {
            for name in real_values {
                if state
                    .deleted_values
                    .entry(path.clone())
                    .or_default()
                    .insert(name.clone())
                {
                    actions.push(DatabaseAction::set(RegistryItem::tombstone(&path, Some(name))));
                }
            }
            state.deleted_keys.insert(path.clone());
            actions.push(DatabaseAction::set(RegistryItem::tombstone(&path, None)));
        } else {
            actions.push(DatabaseAction::remove(RegistryItem::key(&path)));
        }
        debug!(key = %path, actions = actions.len(), hide_real, "deleted key");
        self.bus.enqueue_all(actions);
        Ok(true)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.gate.is_open() {
            Ok(())
        } else {
            Err(ProviderError::Disconnected)
        }
    }

    fn open_key_info(&self, handle: KeyHandle) -> Result<OpenKey> {
        self.handles
            .read()
            .get(&handle)
            .cloned()
            .ok_or(ProviderError::InvalidHandle {
                handle: handle.as_raw(),
            })
    }

    fn virtualization_type(&self, key: &str) -> VirtualizationType {
        match self.rules.find(key) {
            Some(rule) => rule.virtualization_type(),
            None => {
                let fallback = self.rules.fallback();
                warn!(key, fallback = %fallback, "no registry rule matches, using fallback");
                fallback
            }
        }
    }

    /// Insert an empty virtual key if absent, emitting its `Set`. The `Set`
    /// replaces a tombstone left by an earlier delete.
    fn create_virtual_key(&self, state: &mut VirtualRegistry, path: &str) {
        if state.keys.contains_key(path) {
            return;
        }
        state.keys.insert(path.to_string(), BTreeMap::new());
        state.deleted_keys.remove(path);
        debug!(key = path, "created virtual key");
        self.bus.enqueue(DatabaseAction::set(RegistryItem::key(path)));
    }

    /// Copy a real key and its values into the virtual registry.
    fn copy_real_key(&self, state: &mut VirtualRegistry, path: &str) {
        let values: BTreeMap<String, RegistryData> = self
            .real
            .values(path)
            .into_iter()
            .filter(|(name, _)| !state.is_value_deleted(path, name))
            .collect();
        debug!(key = path, values = values.len(), "copied real key");

        let mut actions = vec![DatabaseAction::set(RegistryItem::key(path))];
        actions.extend(
            values
                .iter()
                .map(|(name, data)| DatabaseAction::set(RegistryItem::value(path, name, data.clone()))),
        );
        state.keys.insert(path.to_string(), values);
        self.bus.enqueue_all(actions);
    }
}
