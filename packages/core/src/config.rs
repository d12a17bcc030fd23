//! Engine configuration.
//!
//! The configuration is plain JSON. Every field has a default, so a file
//! only needs to name what it changes:
//!
//! ```json
//! {
//!     "file_system_root": "D:\\Packages\\Installer\\fs",
//!     "file_system_rules": [{ "pattern": "C:\\Windows%", "type": "Transparent" }],
//!     "flush_interval_ms": 500
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::{RuleCollection, VirtualizationRule, VirtualizationType};
use crate::{Error, LogLevel, Result};

/// Connection strings of the two persisted tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub file_system: String,
    pub registry: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_system: "Data Source=filesystem.db;Table=filesystem".to_string(),
            registry: "Data Source=registry.db;Table=registry".to_string(),
        }
    }
}

/// Everything the host needs to set up a virtual environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory that receives every virtual file and directory.
    pub file_system_root: String,
    pub database: DatabaseConfig,
    pub file_system_rules: Vec<VirtualizationRule>,
    pub registry_rules: Vec<VirtualizationRule>,
    /// Type used when no file system rule matches.
    pub default_file_system_type: VirtualizationType,
    /// Type used when no registry rule matches.
    pub default_registry_type: VirtualizationType,
    /// Auto-flush period; 0 disables auto-flush.
    pub flush_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// Stop redirecting after this much inactivity, if set.
    pub idle_release_ms: Option<u64>,
    /// Lowest level guests report to the host.
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file_system_root: "C:\\AppVirt\\FileSystem".to_string(),
            database: DatabaseConfig::default(),
            file_system_rules: Vec::new(),
            registry_rules: RuleCollection::default_registry().rules().to_vec(),
            default_file_system_type: VirtualizationType::TransparentRead,
            default_registry_type: VirtualizationType::TransparentRead,
            flush_interval_ms: 2000,
            ping_timeout_ms: 1000,
            idle_release_ms: None,
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check invariants serde cannot express. Rule patterns are already
    /// validated while deserializing.
    pub fn validate(&self) -> Result<()> {
        if self.file_system_root.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "file_system_root must not be empty".to_string(),
            });
        }
        if self.ping_timeout_ms == 0 {
            return Err(Error::InvalidConfig {
                message: "ping_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.database.file_system.trim().is_empty() || self.database.registry.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "both database connection strings are required".to_string(),
            });
        }
        Ok(())
    }

    pub fn file_system_rule_collection(&self) -> RuleCollection {
        RuleCollection::from_rules(self.file_system_rules.iter().cloned())
            .with_fallback(self.default_file_system_type)
    }

    pub fn registry_rule_collection(&self) -> RuleCollection {
        RuleCollection::from_rules(self.registry_rules.iter().cloned())
            .with_fallback(self.default_registry_type)
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn idle_release(&self) -> Option<Duration> {
        self.idle_release_ms.map(Duration::from_millis)
    }
}
