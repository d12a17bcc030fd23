//! Access to the machine's real registry.

use std::collections::BTreeMap;

use appvirt_core::{CreationDisposition, RegistryData, ResourceRequest};
use parking_lot::RwLock;

use crate::error::{ProviderError, Result};

/// The real registry as seen by the registry provider.
///
/// Key paths are normalized, case-folded identifiers; value names are
/// case-folded.
pub trait RealRegistry: Send + Sync {
    fn key_exists(&self, path: &str) -> bool;

    fn create_key(&self, path: &str) -> Result<()>;

    /// Delete a key and its values. Returns false if it did not exist.
    fn delete_key(&self, path: &str) -> Result<bool>;

    /// Every value under a key; empty if the key does not exist.
    fn values(&self, path: &str) -> Vec<(String, RegistryData)>;

    fn query_value(&self, path: &str, name: &str) -> Option<RegistryData>;

    fn set_value(&self, path: &str, name: &str, data: RegistryData) -> Result<()>;

    fn delete_value(&self, path: &str, name: &str) -> Result<bool>;
}

/// A registry held in memory, used in tests and on hosts without one.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    keys: RwLock<BTreeMap<String, BTreeMap<String, RegistryData>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key given in any accepted spelling (`HKCU\Software`, ...).
    pub fn add_key(&self, path: &str) {
        self.keys.write().entry(fold_key(path)).or_default();
    }

    pub fn add_value(&self, path: &str, name: &str, data: RegistryData) {
        self.keys
            .write()
            .entry(fold_key(path))
            .or_default()
            .insert(name.to_lowercase(), data);
    }
}

fn fold_key(path: &str) -> String {
    ResourceRequest::registry(path, CreationDisposition::Unspecified)
        .identifier()
        .to_string()
}

impl RealRegistry for MemoryRegistry {
    fn key_exists(&self, path: &str) -> bool {
        self.keys.read().contains_key(path)
    }

    fn create_key(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(ProviderError::Registry {
                path: path.to_string(),
                message: "empty key path".to_string(),
            });
        }
        self.keys.write().entry(path.to_string()).or_default();
        Ok(())
    }

    fn delete_key(&self, path: &str) -> Result<bool> {
        Ok(self.keys.write().remove(path).is_some())
    }

    fn values(&self, path: &str) -> Vec<(String, RegistryData)> {
        self.keys
            .read()
            .get(path)
            .map(|values| {
                values
                    .iter()
                    .map(|(name, data)| (name.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn query_value(&self, path: &str, name: &str) -> Option<RegistryData> {
        self.keys.read().get(path)?.get(name).cloned()
    }

    fn set_value(&self, path: &str, name: &str, data: RegistryData) -> Result<()> {
        match self.keys.write().get_mut(path) {
            Some(values) => {
                values.insert(name.to_string(), data);
                Ok(())
            }
            None => Err(ProviderError::KeyNotFound {
                path: path.to_string(),
            }),
        }
    }

    fn delete_value(&self, path: &str, name: &str) -> Result<bool> {
        Ok(self
            .keys
            .write()
            .get_mut(path)
            .is_some_and(|values| values.remove(name).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_keys_are_folded() {
        let registry = MemoryRegistry::new();
        registry.add_value(
            "HKLM\\Software\\Vendor",
            "InstallDir",
            RegistryData::String("C:\\Vendor".to_string()),
        );
        let path = "hkey_local_machine\\software\\vendor";
        assert!(registry.key_exists(path));
        assert_eq!(
            registry.query_value(path, "installdir"),
            Some(RegistryData::String("C:\\Vendor".to_string()))
        );
        assert_eq!(registry.values(path).len(), 1);
    }

    #[test]
    fn set_value_needs_the_key() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.set_value("hkey_users\\x", "v", RegistryData::DWord(1)),
            Err(ProviderError::KeyNotFound { .. })
        ));
        registry.create_key("hkey_users\\x").unwrap();
        registry
            .set_value("hkey_users\\x", "v", RegistryData::DWord(1))
            .unwrap();
        assert!(registry.delete_value("hkey_users\\x", "v").unwrap());
        assert!(!registry.delete_value("hkey_users\\x", "v").unwrap());
        assert!(registry.delete_key("hkey_users\\x").unwrap());
        assert!(!registry.key_exists("hkey_users\\x"));
    }
}
