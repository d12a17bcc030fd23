//! Filesystem redirection.

use std::fmt;
use std::sync::Arc;

use appvirt_core::{
    AlwaysOpen, CreationDisposition, DatabaseAction, FileTableEntry, RedirectionGate,
    ResourceKind, ResourceRequest, RuleCollection, VirtualizationType,
};
use appvirt_sync::SynchronizationBus;
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, Result};
use crate::backend::{parent, FileSystem, HostFileSystem};
use crate::naming::VirtualNameGenerator;
use crate::table::ResourceTable;

/// How a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The real resource is used as is.
    PassThrough,
    /// A mapping already existed.
    Existing,
    /// A new mapping was created; nothing was copied.
    Created,
    /// A new mapping was created and the real content copied into it.
    Copied,
    /// The resource does not exist; the caller gets an identifier that
    /// was never persisted.
    Placeholder,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::PassThrough => "pass-through",
            Outcome::Existing => "existing",
            Outcome::Created => "created",
            Outcome::Copied => "copied",
            Outcome::Placeholder => "placeholder",
        };
        f.write_str(name)
    }
}

/// The entry a request resolved to, and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    entry: FileTableEntry,
    outcome: Outcome,
}

impl Resolution {
    pub fn new(entry: FileTableEntry, outcome: Outcome) -> Self {
        Self { entry, outcome }
    }

    /// The real resource itself, with the caller's casing as the target.
    pub fn pass_through(request: &ResourceRequest) -> Self {
        Self::new(
            FileTableEntry::new(request.identifier(), request.original(), request.kind()),
            Outcome::PassThrough,
        )
    }

    pub fn entry(&self) -> &FileTableEntry {
        &self.entry
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// The identifier the caller should actually open.
    pub fn target(&self) -> &str {
        self.entry.virtual_identifier()
    }

    pub fn is_redirected(&self) -> bool {
        self.outcome != Outcome::PassThrough
    }
}

/// Resolves requests for one resource kind to the identifier to use.
pub trait ResourceProvider: Send + Sync {
    fn resolve(&self, request: &ResourceRequest) -> Result<Resolution>;

    /// Forget the mapping of `entry`. Returns false if there was none.
    fn delete(&self, entry: &FileTableEntry) -> Result<bool>;
}

/// Redirects files, directories and libraries into a virtual root.
///
/// Every mapping created here is pushed to the bus as a `Set`; deletes and
/// renames push `Remove`s. Reads of existing or transparent resources
/// never produce an action.
pub struct FileSystemProvider {
    root: String,
    root_folded: String,
    rules: RuleCollection,
    table: ResourceTable,
    names: VirtualNameGenerator,
    file_system: Arc<dyn FileSystem>,
    gate: Arc<dyn RedirectionGate>,
    bus: Arc<SynchronizationBus<FileTableEntry>>,
}

impl FileSystemProvider {
    pub fn new(
        root: &str,
        rules: RuleCollection,
        bus: Arc<SynchronizationBus<FileTableEntry>>,
    ) -> Self {
        let root_request = ResourceRequest::directory(root, CreationDisposition::Unspecified);
        Self {
            root: root_request.original().to_string(),
            root_folded: root_request.identifier().to_string(),
            rules,
            table: ResourceTable::new(),
            names: VirtualNameGenerator::new(root_request.original()),
            file_system: Arc::new(HostFileSystem::new()),
            gate: Arc::new(AlwaysOpen),
            bus,
        }
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn RedirectionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Preload mappings read back from the store. No actions are emitted.
    pub fn with_entries(mut self, entries: impl IntoIterator<Item = FileTableEntry>) -> Self {
        self.table = ResourceTable::from_entries(entries);
        self
    }

    pub fn with_max_name_attempts(mut self, attempts: usize) -> Self {
        self.names = self.names.with_max_attempts(attempts);
        self
    }

    /// The virtual root, normalized.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn rules(&self) -> &RuleCollection {
        &self.rules
    }

    /// The stored mapping of a request, without creating one.
    pub fn lookup(&self, request: &ResourceRequest) -> Option<FileTableEntry> {
        self.table.get(request.identifier())
    }

    /// Move the mapping of `from` to `to`, keeping its virtual identifier.
    pub fn rename(
        &self,
        from: &ResourceRequest,
        to: &ResourceRequest,
    ) -> Result<Option<FileTableEntry>> {
        self.ensure_open()?;
        let moved = self
            .table
            .rename_with(from.identifier(), to.identifier(), |old, moved| {
                debug!(from = old.real(), to = moved.real(), "renamed mapping");
                self.bus.enqueue_all([
                    DatabaseAction::remove(old.clone()),
                    DatabaseAction::set(moved.clone()),
                ]);
            });
        Ok(moved)
    }

    /// Forget the mapping of a resource that is about to be deleted.
    ///
    /// A mapped resource resolves to its virtual identifier, which is what
    /// the caller should delete. An unmapped resource under a redirecting
    /// rule resolves to a placeholder, so the real resource is never
    /// touched. Anything that would pass through still does.
    pub fn unmap(&self, request: &ResourceRequest) -> Result<Resolution> {
        if self.passes_through(request)? {
            return Ok(Resolution::pass_through(request));
        }
        let removed = self.table.remove_with(request.identifier(), |removed| {
            debug!(real = removed.real(), "deleted mapping");
            self.bus.enqueue(DatabaseAction::remove(removed.clone()));
        });
        Ok(match removed {
            Some(entry) => Resolution {
                entry,
                outcome: Outcome::Existing,
            },
            None => self.placeholder(request),
        })
    }

    /// True if `request` is never redirected: pipes, empty and already
    /// virtual identifiers, and anything under a `Transparent` rule.
    pub fn passes_through(&self, request: &ResourceRequest) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.redirection_type(request).is_none())
    }

    /// Snapshot of every mapping.
    pub fn entries(&self) -> Vec<FileTableEntry> {
        self.table.entries()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.gate.is_open() {
            Ok(())
        } else {
            Err(ProviderError::Disconnected)
        }
    }

    /// The rule type to redirect `request` under, or `None` if it passes
    /// through.
    fn redirection_type(&self, request: &ResourceRequest) -> Option<VirtualizationType> {
        if request.is_empty()
            || request.is_pipe()
            || request.is_virtual()
            || request.is_within(&self.root_folded)
        {
            return None;
        }
        let virtualization_type = match self.rules.find(request.identifier()) {
            Some(rule) => rule.virtualization_type(),
            None => {
                let fallback = self.rules.fallback();
                warn!(
                    identifier = request.identifier(),
                    fallback = %fallback,
                    "no virtualization rule matches, using fallback"
                );
                fallback
            }
        };
        match virtualization_type {
            VirtualizationType::Transparent => None,
            other => Some(other),
        }
    }

    fn placeholder(&self, request: &ResourceRequest) -> Resolution {
        Resolution {
            entry: FileTableEntry::new(
                request.identifier(),
                self.names.placeholder(request.file_name()),
                request.kind(),
            ),
            outcome: Outcome::Placeholder,
        }
    }

    /// Create a mapping for `request`, copying the real resource if asked.
    ///
    /// The copy finishes before the mapping becomes visible, so a thread
    /// racing on the same resource is redirected to finished content.
    fn create(&self, request: &ResourceRequest, copy: bool) -> Result<Resolution> {
        let propose = || -> Result<FileTableEntry> {
            let name = self
                .names
                .generate(request.file_name(), |candidate| {
                    !self.table.is_virtual_taken(candidate) && !self.file_system.exists(candidate)
                })
                .ok_or_else(|| ProviderError::NameExhausted {
                    identifier: request.identifier().to_string(),
                    attempts: self.names.max_attempts(),
                })?;
            Ok(FileTableEntry::new(request.identifier(), name, request.kind()))
        };
        let (entry, created) = self.table.get_or_create(
            request.identifier(),
            propose,
            |entry| self.materialize(request, entry, copy),
            |entry| self.bus.enqueue(DatabaseAction::set(entry.clone())),
        )?;

        let Some(outcome) = created else {
            // Another thread created the mapping first.
            return Ok(Resolution {
                entry,
                outcome: Outcome::Existing,
            });
        };
        debug!(
            real = entry.real(),
            virtual_identifier = entry.virtual_identifier(),
            %outcome,
            "created mapping"
        );
        Ok(Resolution { entry, outcome })
    }

    /// Prepare the virtual location. Failures are logged and leave the
    /// mapping in place; the caller's own open reports the error.
    fn materialize(&self, request: &ResourceRequest, entry: &FileTableEntry, copy: bool) -> Outcome {
        let target = entry.virtual_identifier();
        if let Some(directory) = parent(target) {
            if let Err(e) = self.file_system.create_dir_all(directory) {
                warn!(directory, error = %e, "cannot prepare virtual directory");
                return Outcome::Created;
            }
        }
        if !copy {
            return Outcome::Created;
        }

        let directory =
            request.kind() == ResourceKind::Directory || self.file_system.is_dir(request.original());
        let copied = if directory {
            self.file_system.create_dir_all(target)
        } else {
            self.file_system.copy_file(request.original(), target)
        };
        match copied {
            Ok(()) => Outcome::Copied,
            Err(e) => {
                warn!(
                    from = request.original(),
                    to = target,
                    error = %e,
                    "copy into virtual root failed"
                );
                if !directory {
                    self.discard_partial_copy(target);
                }
                Outcome::Created
            }
        }
    }

    /// Remove whatever a failed copy left at `target`.
    fn discard_partial_copy(&self, target: &str) {
        if !self.file_system.exists(target) || self.file_system.is_dir(target) {
            return;
        }
        if let Err(e) = self.file_system.remove(target) {
            warn!(target, error = %e, "cannot remove partial copy");
        }
    }
}

impl ResourceProvider for FileSystemProvider {
    fn resolve(&self, request: &ResourceRequest) -> Result<Resolution> {
        self.ensure_open()?;
        trace!(request = %request, "resolve");

        let Some(virtualization_type) = self.redirection_type(request) else {
            return Ok(Resolution::pass_through(request));
        };

        if let Some(entry) = self.table.get(request.identifier()) {
            return Ok(Resolution {
                entry,
                outcome: Outcome::Existing,
            });
        }

        let disposition = request.disposition();
        let real_exists = || self.file_system.exists(request.original());

        if disposition.allows_creation() {
            let copy = virtualization_type.copies_on_access()
                && disposition != CreationDisposition::CreateAlways
                && real_exists();
            return self.create(request, copy);
        }

        match virtualization_type {
            VirtualizationType::TransparentRead if !disposition.is_write() => {
                Ok(Resolution::pass_through(request))
            }
            VirtualizationType::TransparentRead | VirtualizationType::VirtualWithFallback
                if real_exists() =>
            {
                self.create(request, true)
            }
            _ => Ok(self.placeholder(request)),
        }
    }

    fn delete(&self, entry: &FileTableEntry) -> Result<bool> {
        self.ensure_open()?;
        let removed = self.table.remove_with(entry.real(), |removed| {
            debug!(real = removed.real(), "deleted mapping");
            self.bus.enqueue(DatabaseAction::remove(removed.clone()));
        });
        Ok(removed.is_some())
    }
}
