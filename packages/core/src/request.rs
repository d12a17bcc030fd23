//! Resource requests: the normalized, immutable form of an intercepted access.
//!
//! Identifiers are normalized once, at construction, so every later stage
//! (rule matching, table lookup, persistence) compares plain strings:
//!
//! - `/` becomes `\`, duplicate separators collapse, `.` and `..` resolve
//! - `\\?\` and `\??\` prefixes are stripped
//! - relative paths are rooted against the working directory
//! - registry hives written as aliases (`HKCU`, `HKLM`, ...) are expanded
//! - the lookup identifier is case-folded, the original casing is kept
//!
//! Named pipes (`\\.\pipe\...`) and identifiers already inside the virtual
//! root are recognized and left exactly as the caller wrote them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry;

const PIPE_PREFIX: &str = "\\\\.\\pipe\\";
const LONG_PATH_PREFIX: &str = "\\\\?\\";
const NT_PATH_PREFIX: &str = "\\??\\";
const DEFAULT_WORKING_DIRECTORY: &str = "C:\\";

/// What kind of resource an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Directory,
    Library,
    RegistryKey,
    RegistryValue,
}

impl ResourceKind {
    /// Stable name used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::File => "file",
            ResourceKind::Directory => "directory",
            ResourceKind::Library => "library",
            ResourceKind::RegistryKey => "registry_key",
            ResourceKind::RegistryValue => "registry_value",
        }
    }

    /// Inverse of [`ResourceKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ResourceKind::File),
            "directory" => Some(ResourceKind::Directory),
            "library" => Some(ResourceKind::Library),
            "registry_key" => Some(ResourceKind::RegistryKey),
            "registry_value" => Some(ResourceKind::RegistryValue),
            _ => None,
        }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, ResourceKind::RegistryKey | ResourceKind::RegistryValue)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the caller wants a missing or existing resource treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CreationDisposition {
    /// Create, failing if the resource exists.
    CreateNew,
    /// Create, replacing any existing resource.
    CreateAlways,
    /// Open, failing if the resource is missing.
    OpenExisting,
    /// Open, creating the resource if it is missing.
    OpenAlways,
    /// Open and truncate, failing if the resource is missing.
    TruncateExisting,
    #[default]
    Unspecified,
}

impl CreationDisposition {
    /// True if a missing resource comes into existence under this disposition.
    pub fn allows_creation(self) -> bool {
        matches!(
            self,
            CreationDisposition::CreateNew
                | CreationDisposition::CreateAlways
                | CreationDisposition::OpenAlways
        )
    }

    /// True if the access may modify the resource.
    pub fn is_write(self) -> bool {
        self.allows_creation() || self == CreationDisposition::TruncateExisting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Real,
    Pipe,
    Virtual,
}

/// A normalized request for a resource.
///
/// Construct through [`ResourceRequest::new`] (or the per-kind shorthands)
/// when the virtual root does not matter, or through a [`RequestNormalizer`]
/// which also recognizes identifiers already inside the virtual root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    identifier: String,
    original: String,
    kind: ResourceKind,
    disposition: CreationDisposition,
    origin: Origin,
}

impl ResourceRequest {
    /// Build a request, rooting relative paths against `C:\`.
    pub fn new(identifier: &str, kind: ResourceKind, disposition: CreationDisposition) -> Self {
        Self::build(identifier, kind, disposition, DEFAULT_WORKING_DIRECTORY)
    }

    pub fn file(identifier: &str, disposition: CreationDisposition) -> Self {
        Self::new(identifier, ResourceKind::File, disposition)
    }

    pub fn directory(identifier: &str, disposition: CreationDisposition) -> Self {
        Self::new(identifier, ResourceKind::Directory, disposition)
    }

    pub fn library(identifier: &str) -> Self {
        Self::new(
            identifier,
            ResourceKind::Library,
            CreationDisposition::OpenExisting,
        )
    }

    pub fn registry(identifier: &str, disposition: CreationDisposition) -> Self {
        Self::new(identifier, ResourceKind::RegistryKey, disposition)
    }

    fn build(
        raw: &str,
        kind: ResourceKind,
        disposition: CreationDisposition,
        working_directory: &str,
    ) -> Self {
        if is_pipe(raw) {
            return Self::verbatim(raw, kind, disposition, Origin::Pipe);
        }

        let original = if raw.trim().is_empty() {
            String::new()
        } else if kind.is_registry() {
            normalize_key(raw)
        } else {
            normalize_path(raw, working_directory)
        };

        Self {
            identifier: original.to_lowercase(),
            original,
            kind,
            disposition,
            origin: Origin::Real,
        }
    }

    fn verbatim(
        raw: &str,
        kind: ResourceKind,
        disposition: CreationDisposition,
        origin: Origin,
    ) -> Self {
        Self {
            identifier: raw.to_string(),
            original: raw.to_string(),
            kind,
            disposition,
            origin,
        }
    }

    /// The case-folded identifier used for rule matching and table lookups.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The normalized identifier with the caller's casing, used to touch the
    /// real resource.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn disposition(&self) -> CreationDisposition {
        self.disposition
    }

    pub fn is_empty(&self) -> bool {
        self.identifier.is_empty()
    }

    pub fn is_pipe(&self) -> bool {
        self.origin == Origin::Pipe
    }

    /// True if the caller already handed us a path inside the virtual root.
    pub fn is_virtual(&self) -> bool {
        self.origin == Origin::Virtual
    }

    /// True if the identifier equals `root` or lies beneath it.
    ///
    /// `root` must itself be a normalized, case-folded identifier.
    pub fn is_within(&self, root: &str) -> bool {
        is_within(&self.identifier, root)
    }

    /// The last component of the identifier, with original casing.
    pub fn file_name(&self) -> &str {
        self.original
            .rsplit('\\')
            .find(|c| !c.is_empty())
            .unwrap_or_default()
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({:?})",
            self.kind, self.original, self.disposition
        )
    }
}

/// Builds requests for one guest process.
///
/// Carries the process working directory (for rooting relative paths) and
/// the virtual root (so already-redirected paths are passed on untouched).
#[derive(Debug, Clone)]
pub struct RequestNormalizer {
    working_directory: String,
    virtual_root: Option<String>,
}

impl Default for RequestNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_DIRECTORY)
    }
}

impl RequestNormalizer {
    pub fn new(working_directory: &str) -> Self {
        Self {
            working_directory: normalize_path(working_directory, DEFAULT_WORKING_DIRECTORY),
            virtual_root: None,
        }
    }

    pub fn with_virtual_root(mut self, root: &str) -> Self {
        self.virtual_root = Some(normalize_path(root, &self.working_directory).to_lowercase());
        self
    }

    pub fn request(
        &self,
        identifier: &str,
        kind: ResourceKind,
        disposition: CreationDisposition,
    ) -> ResourceRequest {
        if !kind.is_registry() {
            if let Some(root) = &self.virtual_root {
                let unified = identifier.trim().replace('/', "\\").to_lowercase();
                if is_within(&unified, root) {
                    return ResourceRequest::verbatim(
                        identifier,
                        kind,
                        disposition,
                        Origin::Virtual,
                    );
                }
            }
        }
        ResourceRequest::build(identifier, kind, disposition, &self.working_directory)
    }
}

fn is_pipe(raw: &str) -> bool {
    raw.trim()
        .replace('/', "\\")
        .to_lowercase()
        .starts_with(PIPE_PREFIX)
}

fn is_within(identifier: &str, root: &str) -> bool {
    let root = root.trim_end_matches('\\');
    match identifier.strip_prefix(root) {
        Some(rest) => rest.is_empty() || rest.starts_with('\\'),
        None => false,
    }
}

/// Split off the rooted prefix of a path: a drive (`C:`), a UNC share
/// (`\\server\share`) or the bare root (`\`). `None` means relative.
fn split_root(path: &str) -> (Option<String>, &str) {
    if let Some(unc) = path.strip_prefix("\\\\") {
        let mut parts = unc.splitn(3, '\\');
        let server = parts.next().unwrap_or_default();
        let share = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();
        return (Some(format!("\\\\{}\\{}", server, share)), rest);
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return (Some(path[..2].to_ascii_uppercase()), &path[2..]);
    }

    if path.starts_with('\\') {
        return (Some(String::new()), path);
    }

    (None, path)
}

fn normalize_path(raw: &str, working_directory: &str) -> String {
    let unified = raw.trim().replace('/', "\\");
    let unified = unified
        .strip_prefix(LONG_PATH_PREFIX)
        .or_else(|| unified.strip_prefix(NT_PATH_PREFIX))
        .unwrap_or(&unified);

    let (prefix, rest) = match split_root(unified) {
        (Some(prefix), rest) => (prefix, rest),
        (None, relative) => {
            let base = normalize_path(working_directory, DEFAULT_WORKING_DIRECTORY);
            return normalize_path(
                &format!("{}\\{}", base, relative),
                DEFAULT_WORKING_DIRECTORY,
            );
        }
    };

    let mut components: Vec<&str> = Vec::new();
    for component in rest.split('\\') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            c => components.push(c),
        }
    }

    if components.is_empty() {
        format!("{}\\", prefix)
    } else {
        format!("{}\\{}", prefix, components.join("\\"))
    }
}

fn normalize_key(raw: &str) -> String {
    let unified = raw.trim().replace('/', "\\");
    let mut components = unified.split('\\').filter(|c| !c.is_empty());
    match components.next() {
        Some(hive) => std::iter::once(registry::expand_hive(hive))
            .chain(components.map(str::to_string))
            .collect::<Vec<_>>()
            .join("\\"),
        None => String::new(),
    }
}
