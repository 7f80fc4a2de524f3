//! Private temp storage for backup artifacts and temp-name allocation.
//!
//! Not transactional itself: names handed out here are never enlisted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

/// Directory name of the process-wide temp root under the system temp dir.
pub const DEFAULT_ROOT_NAME: &str = "txfs";

/// How directory subtrees are relocated into backup storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relocation {
    /// Rename when source and backup share a device, copy+delete otherwise.
    #[default]
    Auto,
    /// Always copy the tree, then delete the original.
    CopyThenDelete,
}

/// Allocates unique temp names below a private root.
#[derive(Debug)]
pub struct TempStore {
    root: PathBuf,
    relocation: Relocation,
    ready: OnceLock<()>,
}

static GLOBAL: OnceLock<Arc<TempStore>> = OnceLock::new();

impl TempStore {
    pub fn new(root: impl Into<PathBuf>, relocation: Relocation) -> Self {
        Self {
            root: root.into(),
            relocation,
            ready: OnceLock::new(),
        }
    }

    /// Process-wide store rooted at `<system temp>/txfs`.
    pub fn global() -> Arc<TempStore> {
        GLOBAL
            .get_or_init(|| {
                Arc::new(TempStore::new(
                    std::env::temp_dir().join(DEFAULT_ROOT_NAME),
                    Relocation::Auto,
                ))
            })
            .clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relocation(&self) -> Relocation {
        self.relocation
    }

    /// Creates the root on first use.
    pub fn ensure_root(&self) -> io::Result<&Path> {
        if self.ready.get().is_none() {
            fs::create_dir_all(&self.root)?;
            log::debug!("Temp root ready: {}", self.root.display());
            let _ = self.ready.set(());
        }
        Ok(&self.root)
    }

    /// Returns a fresh, non-existent path in the root.
    ///
    /// `extension` may be given with or without the leading dot; an empty
    /// extension yields a bare name (used for directory backups).
    pub fn unique_path(&self, extension: &str) -> io::Result<PathBuf> {
        let root = self.ensure_root()?;
        let extension = extension.trim_start_matches('.');
        loop {
            let stem = Uuid::new_v4().simple().to_string();
            let name = if extension.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, extension)
            };
            let candidate = root.join(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    /// Backup path for `target`, keeping its extension.
    pub fn backup_path_for(&self, target: &Path) -> io::Result<PathBuf> {
        let extension = target
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.unique_path(&extension)
    }

    /// Fresh directory name `prefix` + 16 hex chars inside `parent`.
    pub fn unique_dir_name(parent: &Path, prefix: &str) -> PathBuf {
        let id = Uuid::new_v4().simple().to_string();
        parent.join(format!("{}{}", prefix, &id[..16]))
    }
}
