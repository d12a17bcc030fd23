//! File system backends: what the provider copies into and checks for name collisions.
//!
//! Identifiers handed to a [`FileSystem`] are normalized Windows-style
//! paths (`C:\dir\file`). [`HostFileSystem`] maps them onto the machine it
//! runs on; [`MemoryFileSystem`] keeps everything in a map.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// File system operations the providers rely on.
pub trait FileSystem: Send + Sync {
    fn exists(&self, identifier: &str) -> bool;

    fn is_dir(&self, identifier: &str) -> bool;

    /// Copy a file's content, replacing `to` if it exists.
    fn copy_file(&self, from: &str, to: &str) -> io::Result<()>;

    /// Create a directory and all of its missing parents.
    fn create_dir_all(&self, identifier: &str) -> io::Result<()>;

    /// Remove a file or an empty directory.
    fn remove(&self, identifier: &str) -> io::Result<()>;
}

/// The parent of a normalized identifier, if it has one.
pub fn parent(identifier: &str) -> Option<&str> {
    let (parent, _) = identifier.rsplit_once('\\')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// The real file system.
///
/// On Windows identifiers are used as paths directly. Elsewhere, or when a
/// base directory is given, `X:\a\b` is mapped to `<base>/X/a/b`.
#[derive(Debug, Clone, Default)]
pub struct HostFileSystem {
    base: Option<PathBuf>,
}

impl HostFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every drive to a subdirectory of `base`.
    pub fn rooted(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    /// The native path of an identifier.
    pub fn native_path(&self, identifier: &str) -> PathBuf {
        let Some(base) = &self.base else {
            if cfg!(windows) {
                return PathBuf::from(identifier);
            }
            return identifier.split('\\').filter(|c| !c.is_empty()).fold(
                PathBuf::from("/"),
                |path, component| path.join(component.trim_end_matches(':')),
            );
        };
        identifier
            .split('\\')
            .filter(|c| !c.is_empty())
            .fold(base.clone(), |path, component| {
                path.join(component.trim_end_matches(':'))
            })
    }
}

impl FileSystem for HostFileSystem {
    fn exists(&self, identifier: &str) -> bool {
        self.native_path(identifier).exists()
    }

    fn is_dir(&self, identifier: &str) -> bool {
        self.native_path(identifier).is_dir()
    }

    fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        fs::copy(self.native_path(from), self.native_path(to)).map(|_| ())
    }

    fn create_dir_all(&self, identifier: &str) -> io::Result<()> {
        fs::create_dir_all(self.native_path(identifier))
    }

    fn remove(&self, identifier: &str) -> io::Result<()> {
        let path = self.native_path(identifier);
        if Path::is_dir(&path) {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Directory,
    File(Vec<u8>),
}

/// An in-memory file system. Identifiers are compared case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories.
    pub fn add_file(&self, identifier: &str, content: impl Into<Vec<u8>>) {
        let mut nodes = self.nodes.write();
        if let Some(parent) = parent(identifier) {
            Self::create_ancestors(&mut nodes, parent);
        }
        nodes.insert(identifier.to_lowercase(), Node::File(content.into()));
    }

    /// The content of a file, if there is one at `identifier`.
    pub fn read(&self, identifier: &str) -> Option<Vec<u8>> {
        match self.nodes.read().get(&identifier.to_lowercase()) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    fn create_ancestors(nodes: &mut BTreeMap<String, Node>, identifier: &str) {
        let mut current = Some(identifier);
        while let Some(dir) = current {
            nodes
                .entry(dir.to_lowercase())
                .or_insert(Node::Directory);
            current = parent(dir);
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, identifier: &str) -> bool {
        self.nodes.read().contains_key(&identifier.to_lowercase())
    }

    fn is_dir(&self, identifier: &str) -> bool {
        matches!(
            self.nodes.read().get(&identifier.to_lowercase()),
            Some(Node::Directory)
        )
    }

    fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        let content = self.read(from).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", from))
        })?;
        let mut nodes = self.nodes.write();
        if let Some(Node::Directory) = nodes.get(&to.to_lowercase()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("is a directory: {}", to),
            ));
        }
        nodes.insert(to.to_lowercase(), Node::File(content));
        Ok(())
    }

    fn create_dir_all(&self, identifier: &str) -> io::Result<()> {
        let mut nodes = self.nodes.write();
        if let Some(Node::File(_)) = nodes.get(&identifier.to_lowercase()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("is a file: {}", identifier),
            ));
        }
        Self::create_ancestors(&mut nodes, identifier);
        Ok(())
    }

    fn remove(&self, identifier: &str) -> io::Result<()> {
        let key = identifier.to_lowercase();
        let mut nodes = self.nodes.write();
        let prefix = format!("{}\\", key);
        if nodes.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("directory not empty: {}", identifier),
            ));
        }
        nodes
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, identifier.to_string()))
    }
}
