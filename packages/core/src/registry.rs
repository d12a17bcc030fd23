//! Registry items: keys and typed values, and their row encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::row::{Row, TableRow};
use crate::{Error, Result};

/// Separator between a key path and a value name in a value row's key.
///
/// Normalized key paths never contain an empty component, so a doubled
/// separator cannot occur inside the key path itself.
pub const VALUE_SEPARATOR: &str = "\\\\";

const KIND_KEY: &str = "key";
const KIND_VALUE: &str = "value";
const KIND_DELETED_KEY: &str = "deleted-key";
const KIND_DELETED_VALUE: &str = "deleted-value";

/// Full hive names paired with their short aliases.
pub const HIVES: [(&str, &str); 7] = [
    ("HKEY_CLASSES_ROOT", "HKCR"),
    ("HKEY_CURRENT_USER", "HKCU"),
    ("HKEY_LOCAL_MACHINE", "HKLM"),
    ("HKEY_USERS", "HKU"),
    ("HKEY_CURRENT_CONFIG", "HKCC"),
    ("HKEY_PERFORMANCE_DATA", "HKPD"),
    ("HKEY_DYN_DATA", "HKDD"),
];

/// Expand a hive alias (`HKCU`) to its full name; full names are upper-cased.
/// Anything else is returned unchanged.
pub fn expand_hive(component: &str) -> String {
    HIVES
        .iter()
        .find(|(full, alias)| {
            component.eq_ignore_ascii_case(full) || component.eq_ignore_ascii_case(alias)
        })
        .map(|(full, _)| full.to_string())
        .unwrap_or_else(|| component.to_string())
}

/// The registry type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryValueKind {
    None,
    String,
    ExpandString,
    MultiString,
    Binary,
    DWord,
    QWord,
}

/// Typed registry value data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RegistryData {
    None,
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
    DWord(u32),
    QWord(u64),
}

impl RegistryData {
    pub fn kind(&self) -> RegistryValueKind {
        match self {
            RegistryData::None => RegistryValueKind::None,
            RegistryData::String(_) => RegistryValueKind::String,
            RegistryData::ExpandString(_) => RegistryValueKind::ExpandString,
            RegistryData::MultiString(_) => RegistryValueKind::MultiString,
            RegistryData::Binary(_) => RegistryValueKind::Binary,
            RegistryData::DWord(_) => RegistryValueKind::DWord,
            RegistryData::QWord(_) => RegistryValueKind::QWord,
        }
    }
}

/// One row of the registry table: a key, a named value under a key, or a
/// tombstone hiding a real key or value that was deleted virtually.
///
/// A tombstone shares its row key with the key or value it hides, so
/// writing one replaces the live row and recreating the item replaces the
/// tombstone.
///
/// Key paths are normalized and case-folded; value names are case-folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryItem {
    Key {
        path: String,
    },
    Value {
        key_path: String,
        name: String,
        data: RegistryData,
    },
    Tombstone {
        key_path: String,
        /// The hidden value, or `None` when the whole key is hidden.
        name: Option<String>,
    },
}

impl RegistryItem {
    pub fn key(path: impl Into<String>) -> Self {
        RegistryItem::Key { path: path.into() }
    }

    pub fn value(key_path: impl Into<String>, name: impl Into<String>, data: RegistryData) -> Self {
        RegistryItem::Value {
            key_path: key_path.into(),
            name: name.into(),
            data,
        }
    }

    /// A tombstone for a real key (`name` = `None`) or one of its values.
    pub fn tombstone(key_path: impl Into<String>, name: Option<String>) -> Self {
        RegistryItem::Tombstone {
            key_path: key_path.into(),
            name,
        }
    }

    /// The key path this item lives under (its own path for keys).
    pub fn key_path(&self) -> &str {
        match self {
            RegistryItem::Key { path } => path,
            RegistryItem::Value { key_path, .. } | RegistryItem::Tombstone { key_path, .. } => {
                key_path
            }
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, RegistryItem::Tombstone { .. })
    }

    /// Row key of a value item.
    pub fn value_row_key(key_path: &str, name: &str) -> String {
        format!("{}{}{}", key_path, VALUE_SEPARATOR, name)
    }
}

impl fmt::Display for RegistryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryItem::Key { path } => write!(f, "{}", path),
            RegistryItem::Value { key_path, name, .. } => write!(f, "{} [{}]", key_path, name),
            RegistryItem::Tombstone {
                key_path,
                name: None,
            } => write!(f, "{} (deleted)", key_path),
            RegistryItem::Tombstone {
                key_path,
                name: Some(name),
            } => write!(f, "{} [{}] (deleted)", key_path, name),
        }
    }
}

impl TableRow for RegistryItem {
    const TABLE: &'static str = "registry";

    fn row_key(&self) -> String {
        match self {
            RegistryItem::Key { path } => path.clone(),
            RegistryItem::Value { key_path, name, .. }
            | RegistryItem::Tombstone {
                key_path,
                name: Some(name),
            } => Self::value_row_key(key_path, name),
            RegistryItem::Tombstone {
                key_path,
                name: None,
            } => key_path.clone(),
        }
    }

    fn to_row(&self) -> Result<Row> {
        Ok(match self {
            RegistryItem::Key { path } => Row::new(path.clone(), String::new(), KIND_KEY),
            RegistryItem::Value { data, .. } => {
                Row::new(self.row_key(), serde_json::to_string(data)?, KIND_VALUE)
            }
            RegistryItem::Tombstone { name: None, .. } => {
                Row::new(self.row_key(), String::new(), KIND_DELETED_KEY)
            }
            RegistryItem::Tombstone { name: Some(_), .. } => {
                Row::new(self.row_key(), String::new(), KIND_DELETED_VALUE)
            }
        })
    }

    fn from_row(row: Row) -> Result<Self> {
        match row.kind.as_str() {
            KIND_KEY => Ok(RegistryItem::Key { path: row.key }),
            KIND_VALUE => {
                let (key_path, name) = split_value_key(&row.key)?;
                let data = serde_json::from_str(&row.value).map_err(|e| Error::MalformedRow {
                    table: Self::TABLE,
                    key: row.key.clone(),
                    message: e.to_string(),
                })?;
                Ok(RegistryItem::Value {
                    key_path: key_path.to_string(),
                    name: name.to_string(),
                    data,
                })
            }
            KIND_DELETED_KEY => Ok(RegistryItem::Tombstone {
                key_path: row.key,
                name: None,
            }),
            KIND_DELETED_VALUE => {
                let (key_path, name) = split_value_key(&row.key)?;
                Ok(RegistryItem::Tombstone {
                    key_path: key_path.to_string(),
                    name: Some(name.to_string()),
                })
            }
            other => Err(Error::MalformedRow {
                table: Self::TABLE,
                key: row.key.clone(),
                message: format!("unknown kind '{}'", other),
            }),
        }
    }
}

fn split_value_key(key: &str) -> Result<(&str, &str)> {
    key.split_once(VALUE_SEPARATOR)
        .ok_or_else(|| Error::MalformedRow {
            table: RegistryItem::TABLE,
            key: key.to_string(),
            message: "value row without a value name separator".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_aliases_and_full_names() {
        assert_eq!(expand_hive("hkcu"), "HKEY_CURRENT_USER");
        assert_eq!(expand_hive("HKLM"), "HKEY_LOCAL_MACHINE");
        assert_eq!(expand_hive("hkey_users"), "HKEY_USERS");
        assert_eq!(expand_hive("Software"), "Software");
    }

    #[test]
    fn value_row_layout() {
        let item = RegistryItem::value(
            "hkey_current_user\\software\\vendor",
            "installdir",
            RegistryData::String("C:\\App".to_string()),
        );
        let row = item.to_row().unwrap();
        assert_eq!(row.key, "hkey_current_user\\software\\vendor\\\\installdir");
        assert_eq!(row.kind, "value");
        assert_eq!(RegistryItem::from_row(row).unwrap(), item);
    }

    #[test]
    fn default_value_has_empty_name() {
        let item = RegistryItem::value("hkey_users\\x", "", RegistryData::DWord(7));
        let decoded = RegistryItem::from_row(item.to_row().unwrap()).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn key_row_has_empty_value() {
        let row = RegistryItem::key("hkey_users\\x").to_row().unwrap();
        assert_eq!(row.value, "");
        assert_eq!(row.kind, "key");
    }

    #[test]
    fn tombstones_share_the_row_key_of_what_they_hide() {
        let value = RegistryItem::value("hkey_users\\x", "v", RegistryData::DWord(1));
        let hidden_value = RegistryItem::tombstone("hkey_users\\x", Some("v".to_string()));
        assert_eq!(hidden_value.row_key(), value.row_key());
        assert_eq!(hidden_value.to_string(), "hkey_users\\x [v] (deleted)");

        let hidden_key = RegistryItem::tombstone("hkey_users\\x", None);
        assert_eq!(hidden_key.row_key(), RegistryItem::key("hkey_users\\x").row_key());
        assert!(hidden_key.is_tombstone());

        for item in [hidden_value, hidden_key] {
            let row = item.to_row().unwrap();
            assert!(row.kind.starts_with("deleted-"));
            assert_eq!(RegistryItem::from_row(row).unwrap(), item);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let row = Row::new("k".to_string(), String::new(), "blob");
        assert!(matches!(
            RegistryItem::from_row(row),
            Err(Error::MalformedRow { .. })
        ));
    }

    #[test]
    fn value_without_separator_is_rejected() {
        let row = Row::new("hkey_users\\x".to_string(), "{\"type\":\"None\"}".to_string(), "value");
        assert!(RegistryItem::from_row(row).is_err());
    }

    #[test]
    fn data_kinds() {
        assert_eq!(RegistryData::QWord(1).kind(), RegistryValueKind::QWord);
        assert_eq!(
            RegistryData::MultiString(vec![]).kind(),
            RegistryValueKind::MultiString
        );
    }
}
