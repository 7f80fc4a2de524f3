//! Backup artifacts and the shared backup/restore/cleanup template.
//!
//! ## Artifacts
//!
//! A [`BackupArtifact`] owns one private file or directory in the temp store.
//! It is released explicitly on commit or after rollback; if an operation is
//! abandoned on any other path (failed execute, dropped log) the artifact is
//! removed when it goes out of scope.
//!
//! ## Templates
//!
//! - [`FileSnapshot`]: single-file copy, restored by overwriting the target.
//! - [`DirectoryBackup`]: whole subtree relocated into the store, moved back
//!   on restore.

use super::temp::{Relocation, TempStore};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    File,
    Directory,
}

/// A private backup file or directory, removed exactly once.
#[derive(Debug)]
pub struct BackupArtifact {
    path: PathBuf,
    kind: ArtifactKind,
    released: bool,
}

impl BackupArtifact {
    fn file(path: PathBuf) -> Self {
        Self {
            path,
            kind: ArtifactKind::File,
            released: false,
        }
    }

    fn directory(path: PathBuf) -> Self {
        Self {
            path,
            kind: ArtifactKind::Directory,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Deletes the artifact from disk. Idempotent.
    ///
    /// Read-only attributes are cleared first.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }

        match self.kind {
            ArtifactKind::File => {
                if self.path.exists() {
                    make_writable(&self.path)?;
                    fs::remove_file(&self.path)?;
                }
            }
            ArtifactKind::Directory => {
                if self.path.exists() {
                    fs::remove_dir_all(&self.path)?;
                }
            }
        }

        log::debug!("Released backup: {}", self.path.display());
        self.released = true;
        Ok(())
    }

    /// Marks the artifact as consumed without touching the disk.
    ///
    /// Used once a directory backup has been moved back into place.
    fn disarm(&mut self) {
        self.released = true;
    }
}

impl Drop for BackupArtifact {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                log::warn!("Failed to release backup {}: {}", self.path.display(), e);
            }
        }
    }
}

/// State of a single-file target before the operation ran.
#[derive(Debug)]
pub enum Prior {
    /// Target did not exist; undo deletes it.
    Missing,
    /// Target existed; its content lives in the artifact.
    Saved(BackupArtifact),
}

/// Single-file backup template shared by content operations.
#[derive(Debug)]
pub struct FileSnapshot {
    target: PathBuf,
    prior: Prior,
}

impl FileSnapshot {
    /// Copies `target` into the store if it exists.
    ///
    /// A partially written backup is removed before the error propagates.
    pub fn capture(target: &Path, store: &TempStore) -> io::Result<Self> {
        if !target.is_file() {
            log::debug!("No backup needed, target missing: {}", target.display());
            return Ok(Self {
                target: target.to_path_buf(),
                prior: Prior::Missing,
            });
        }

        let artifact = BackupArtifact::file(store.backup_path_for(target)?);
        fs::copy(target, artifact.path())?;
        log::debug!(
            "Backed up {} → {}",
            target.display(),
            artifact.path().display()
        );

        Ok(Self {
            target: target.to_path_buf(),
            prior: Prior::Saved(artifact),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Returns true if the target existed when captured.
    pub fn existed(&self) -> bool {
        matches!(self.prior, Prior::Saved(_))
    }

    pub fn backup_path(&self) -> Option<&Path> {
        match &self.prior {
            Prior::Saved(artifact) => Some(artifact.path()),
            Prior::Missing => None,
        }
    }

    /// Puts the captured state back.
    ///
    /// Overwrites the target from the backup, recreating missing parents,
    /// or deletes the target if it did not exist before.
    pub fn restore(&self) -> io::Result<()> {
        match &self.prior {
            Prior::Saved(artifact) => {
                if let Some(parent) = self.target.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                }
                fs::copy(artifact.path(), &self.target)?;
                log::debug!("Restored: {}", self.target.display());
            }
            Prior::Missing => {
                if self.target.is_file() {
                    fs::remove_file(&self.target)?;
                    log::debug!("Removed: {}", self.target.display());
                }
            }
        }
        Ok(())
    }

    /// Deletes the backup artifact. Idempotent.
    pub fn release(&mut self) -> io::Result<()> {
        match &mut self.prior {
            Prior::Saved(artifact) => artifact.release(),
            Prior::Missing => Ok(()),
        }
    }
}

/// Backup of a deleted directory subtree.
#[derive(Debug)]
pub struct DirectoryBackup {
    target: PathBuf,
    relocation: Relocation,
    artifact: Option<BackupArtifact>,
}

impl DirectoryBackup {
    /// Relocates `target` into the store, removing it from its original place.
    ///
    /// A missing target is recorded as "nothing to restore".
    pub fn capture_and_remove(target: &Path, store: &TempStore) -> io::Result<Self> {
        let mut backup = Self {
            target: target.to_path_buf(),
            relocation: store.relocation(),
            artifact: None,
        };

        if !target.is_dir() {
            log::debug!("Directory already absent: {}", target.display());
            return Ok(backup);
        }

        let artifact = BackupArtifact::directory(store.unique_path("")?);
        relocate_dir(target, artifact.path(), store.relocation())?;
        log::debug!(
            "Relocated {} → {}",
            target.display(),
            artifact.path().display()
        );

        backup.artifact = Some(artifact);
        Ok(backup)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(BackupArtifact::path)
    }

    /// Moves the subtree back to its original location.
    pub fn restore(&mut self) -> io::Result<()> {
        let Some(artifact) = self.artifact.as_mut() else {
            return Ok(());
        };
        if artifact.is_released() || !artifact.path().exists() {
            return Ok(());
        }

        if let Some(parent) = self.target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        relocate_dir(artifact.path(), &self.target, self.relocation)?;
        artifact.disarm();
        log::debug!("Restored directory: {}", self.target.display());
        Ok(())
    }

    /// Deletes whatever remains of the backup. Idempotent.
    pub fn release(&mut self) -> io::Result<()> {
        match self.artifact.as_mut() {
            Some(artifact) => artifact.release(),
            None => Ok(()),
        }
    }
}

/// Moves a directory tree from `from` to `to`.
///
/// Same device: a single rename. Otherwise (or when forced): copy the whole
/// tree, then delete the original.
///
/// Partial failures:
/// - copy fails: the partial copy is removed, `from` is untouched
/// - delete fails: `from` is repopulated from the copy, the copy is removed
pub fn relocate_dir(from: &Path, to: &Path, relocation: Relocation) -> io::Result<()> {
    let same_fs = match relocation {
        Relocation::Auto => is_same_filesystem(from, to)?,
        Relocation::CopyThenDelete => false,
    };

    if same_fs {
        return fs::rename(from, to);
    }

    log::debug!(
        "Cross-volume move, copying {} → {}",
        from.display(),
        to.display()
    );

    if let Err(e) = copy_dir_recursive(from, to) {
        if to.exists() {
            if let Err(cleanup) = fs::remove_dir_all(to) {
                log::warn!("Failed to remove partial copy {}: {}", to.display(), cleanup);
            }
        }
        return Err(e);
    }

    if let Err(e) = fs::remove_dir_all(from) {
        match copy_dir_recursive(to, from) {
            Ok(()) => {
                if let Err(cleanup) = fs::remove_dir_all(to) {
                    log::warn!("Failed to remove copy {}: {}", to.display(), cleanup);
                }
            }
            Err(restore) => {
                log::warn!(
                    "Failed to repopulate {} from {}: {}",
                    from.display(),
                    to.display(),
                    restore
                );
            }
        }
        return Err(e);
    }

    Ok(())
}

/// Checks if paths are on same filesystem.
///
/// `path2` may not exist yet; its parent is probed instead.
fn is_same_filesystem(path1: &Path, path2: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let meta1 = fs::metadata(path1)?;
        let meta2_parent = match path2.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) => parent,
            None => path2,
        };
        let meta2 = fs::metadata(meta2_parent)?;
        Ok(meta1.dev() == meta2.dev())
    }

    #[cfg(not(unix))]
    {
        let root1 = path1.components().next();
        let root2 = path2.components().next();
        Ok(root1 == root2)
    }
}

/// Recursively copies directory tree, overwriting files already at `to`.
pub fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from_path = entry.path();
        let to_path = to.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&from_path, &to_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from_path, &to_path)?;
        } else {
            fs::copy(&from_path, &to_path)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let link = fs::read_link(from)?;
    if to.symlink_metadata().is_ok() {
        fs::remove_file(to)?;
    }
    std::os::unix::fs::symlink(link, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

#[cfg(unix)]
pub(crate) fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)?;
    let mut perms = metadata.permissions();
    let mode = perms.mode();
    if mode & 0o200 == 0 {
        perms.set_mode(mode | 0o200);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn make_writable(path: &Path) -> io::Result<()> {
    let metadata = fs::metadata(path)?;
    let mut perms = metadata.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}
