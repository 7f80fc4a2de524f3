//! Reversible file system operations.
//!
//! An [`Operation`] describes a mutation. Executing it consumes the request,
//! takes whatever backup the mutation needs, performs the mutation, and
//! yields an [`AppliedOperation`] that knows how to undo itself.
//!
//! ## Lifecycle
//!
//! 1. **Execute**: `Operation::execute()` runs exactly once (it consumes the
//!    request). On failure any backup taken so far is released.
//! 2. **Rollback** (abort only): `AppliedOperation::rollback()` undoes the
//!    mutation; repeated calls are no-ops.
//! 3. **Cleanup**: `AppliedOperation::cleanup()` deletes the backup artifact,
//!    on commit or after rollback. Idempotent.
//!
//! ## Undo strategies
//!
//! | Kind                                   | Backup                        |
//! |----------------------------------------|-------------------------------|
//! | write, append, copy, delete, snapshot  | single-file snapshot          |
//! | move                                   | displaced destination, if any |
//! | replace                                | destination + backup name     |
//! | delete-directory                       | relocated subtree             |
//! | create-directory                       | rollback anchor (no backup)   |

use super::backup::{DirectoryBackup, FileSnapshot};
use super::encoding::Encoding;
use super::primitives;
use super::temp::TempStore;
use crate::error::{Result, TxError};

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Operation kinds, used for logging and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    WriteText,
    WriteBytes,
    WriteLines,
    AppendText,
    AppendLines,
    Copy,
    Move,
    Delete,
    DeleteDirectory,
    CreateDirectory,
    Replace,
    Snapshot,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::WriteText => "write-text",
            OperationKind::WriteBytes => "write-bytes",
            OperationKind::WriteLines => "write-lines",
            OperationKind::AppendText => "append-text",
            OperationKind::AppendLines => "append-lines",
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::DeleteDirectory => "delete-directory",
            OperationKind::CreateDirectory => "create-directory",
            OperationKind::Replace => "replace",
            OperationKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A requested file system mutation.
#[derive(Debug, Clone)]
pub enum Operation {
    WriteText {
        path: PathBuf,
        contents: String,
        encoding: Encoding,
    },
    WriteBytes {
        path: PathBuf,
        contents: Vec<u8>,
    },
    WriteLines {
        path: PathBuf,
        lines: Vec<String>,
        encoding: Encoding,
    },
    AppendText {
        path: PathBuf,
        contents: String,
        encoding: Encoding,
    },
    AppendLines {
        path: PathBuf,
        lines: Vec<String>,
        encoding: Encoding,
    },
    Copy {
        source: PathBuf,
        destination: PathBuf,
        overwrite: bool,
    },
    Move {
        source: PathBuf,
        destination: PathBuf,
        overwrite: bool,
    },
    Delete {
        path: PathBuf,
    },
    DeleteDirectory {
        path: PathBuf,
    },
    CreateDirectory {
        path: PathBuf,
    },
    /// Replace `destination` with `source`, optionally keeping the old
    /// destination under `destination_backup`.
    Replace {
        source: PathBuf,
        destination: PathBuf,
        destination_backup: Option<PathBuf>,
    },
    /// Backup only; the caller mutates the file through another path.
    Snapshot {
        path: PathBuf,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::WriteText { .. } => OperationKind::WriteText,
            Operation::WriteBytes { .. } => OperationKind::WriteBytes,
            Operation::WriteLines { .. } => OperationKind::WriteLines,
            Operation::AppendText { .. } => OperationKind::AppendText,
            Operation::AppendLines { .. } => OperationKind::AppendLines,
            Operation::Copy { .. } => OperationKind::Copy,
            Operation::Move { .. } => OperationKind::Move,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::DeleteDirectory { .. } => OperationKind::DeleteDirectory,
            Operation::CreateDirectory { .. } => OperationKind::CreateDirectory,
            Operation::Replace { .. } => OperationKind::Replace,
            Operation::Snapshot { .. } => OperationKind::Snapshot,
        }
    }

    /// The path this operation mutates.
    pub fn target(&self) -> &Path {
        match self {
            Operation::WriteText { path, .. }
            | Operation::WriteBytes { path, .. }
            | Operation::WriteLines { path, .. }
            | Operation::AppendText { path, .. }
            | Operation::AppendLines { path, .. }
            | Operation::Delete { path }
            | Operation::DeleteDirectory { path }
            | Operation::CreateDirectory { path }
            | Operation::Snapshot { path } => path,
            Operation::Copy { destination, .. }
            | Operation::Move { destination, .. }
            | Operation::Replace { destination, .. } => destination,
        }
    }

    /// Human-readable one-liner.
    pub fn describe(&self) -> String {
        match self {
            Operation::Copy {
                source,
                destination,
                ..
            }
            | Operation::Move {
                source,
                destination,
                ..
            }
            | Operation::Replace {
                source,
                destination,
                ..
            } => format!(
                "{}: {} → {}",
                self.kind(),
                source.display(),
                destination.display()
            ),
            _ => format!("{}: {}", self.kind(), self.target().display()),
        }
    }

    /// Performs the plain mutation with no backup.
    pub fn run_direct(self) -> Result<()> {
        match self {
            Operation::WriteText {
                path,
                contents,
                encoding,
            } => primitives::write_text(&path, &contents, encoding)?,
            Operation::WriteBytes { path, contents } => primitives::write_bytes(&path, &contents)?,
            Operation::WriteLines {
                path,
                lines,
                encoding,
            } => primitives::write_lines(&path, &lines, encoding)?,
            Operation::AppendText {
                path,
                contents,
                encoding,
            } => primitives::append_text(&path, &contents, encoding)?,
            Operation::AppendLines {
                path,
                lines,
                encoding,
            } => primitives::append_lines(&path, &lines, encoding)?,
            Operation::Copy {
                source,
                destination,
                overwrite,
            } => primitives::copy_file(&source, &destination, overwrite)?,
            Operation::Move {
                source,
                destination,
                overwrite,
            } => {
                primitives::ensure_destination_free(&destination, overwrite)?;
                primitives::move_file(&source, &destination)?;
            }
            Operation::Delete { path } => primitives::delete_file(&path)?,
            Operation::DeleteDirectory { path } => fs::remove_dir_all(&path)?,
            Operation::CreateDirectory { path } => fs::create_dir_all(&path)?,
            Operation::Replace {
                source,
                destination,
                destination_backup,
            } => primitives::replace(&source, &destination, destination_backup.as_deref())?,
            Operation::Snapshot { .. } => {}
        }
        Ok(())
    }

    /// Backs up, then mutates.
    ///
    /// Preconditions are checked before anything is touched. If the mutation
    /// fails after a backup was taken, the target is restored from it
    /// (best effort) and the backup released before the error propagates.
    pub fn execute(self, store: &TempStore) -> Result<AppliedOperation> {
        let kind = self.kind();
        log::debug!("Executing {}", self.describe());

        let undo = match self {
            Operation::WriteText {
                path,
                contents,
                encoding,
            } => guarded(&path, store, || {
                primitives::write_text(&path, &contents, encoding)
            })?,
            Operation::WriteBytes { path, contents } => {
                guarded(&path, store, || primitives::write_bytes(&path, &contents))?
            }
            Operation::WriteLines {
                path,
                lines,
                encoding,
            } => guarded(&path, store, || {
                primitives::write_lines(&path, &lines, encoding)
            })?,
            Operation::AppendText {
                path,
                contents,
                encoding,
            } => guarded(&path, store, || {
                primitives::append_text(&path, &contents, encoding)
            })?,
            Operation::AppendLines {
                path,
                lines,
                encoding,
            } => guarded(&path, store, || {
                primitives::append_lines(&path, &lines, encoding)
            })?,
            Operation::Copy {
                source,
                destination,
                overwrite,
            } => {
                primitives::ensure_destination_free(&destination, overwrite)?;
                guarded(&destination, store, || {
                    fs::copy(&source, &destination).map(|_| ())
                })?
            }
            Operation::Move {
                source,
                destination,
                overwrite,
            } => execute_move(source, destination, overwrite, store)?,
            Operation::Delete { path } => {
                guarded(&path, store, || primitives::delete_file(&path))?
            }
            Operation::DeleteDirectory { path } => {
                Undo::RestoreDirectory(DirectoryBackup::capture_and_remove(&path, store)?)
            }
            Operation::CreateDirectory { path } => execute_create_directory(&path)?,
            Operation::Replace {
                source,
                destination,
                destination_backup,
            } => execute_replace(source, destination, destination_backup, store)?,
            Operation::Snapshot { path } => Undo::Restore(FileSnapshot::capture(&path, store)?),
        };

        Ok(AppliedOperation {
            kind,
            undo,
            rolled_back: false,
        })
    }
}

/// Captures `target`, runs `mutate`, and restores on failure.
fn guarded<F>(target: &Path, store: &TempStore, mutate: F) -> Result<Undo>
where
    F: FnOnce() -> io::Result<()>,
{
    let snapshot = FileSnapshot::capture(target, store)?;

    if let Err(e) = mutate() {
        if let Err(restore) = snapshot.restore() {
            log::warn!(
                "Failed to restore {} after failed mutation: {}",
                target.display(),
                restore
            );
        }
        return Err(e.into());
    }

    Ok(Undo::Restore(snapshot))
}

fn execute_move(
    source: PathBuf,
    destination: PathBuf,
    overwrite: bool,
    store: &TempStore,
) -> Result<Undo> {
    primitives::ensure_destination_free(&destination, overwrite)?;
    if !source.exists() {
        return Err(TxError::NotFound(source));
    }

    let displaced = if destination.is_file() {
        Some(FileSnapshot::capture(&destination, store)?)
    } else {
        None
    };

    if let Err(e) = primitives::move_file(&source, &destination) {
        if let Some(snapshot) = &displaced {
            if let Err(restore) = snapshot.restore() {
                log::warn!(
                    "Failed to restore {} after failed move: {}",
                    destination.display(),
                    restore
                );
            }
        }
        return Err(e.into());
    }

    Ok(Undo::MoveBack {
        source,
        destination,
        displaced,
    })
}

/// Creates the full chain, remembering the shallowest directory created.
fn execute_create_directory(path: &Path) -> Result<Undo> {
    let full = std::path::absolute(path)?;

    if full.is_dir() {
        log::debug!("Directory already exists: {}", full.display());
        return Ok(Undo::RemoveCreated { anchor: None });
    }

    let mut anchor = full.clone();
    while let Some(parent) = anchor.parent() {
        if parent.is_dir() {
            break;
        }
        anchor = parent.to_path_buf();
    }

    if let Err(e) = fs::create_dir_all(&full) {
        if anchor.is_dir() {
            if let Err(cleanup) = fs::remove_dir_all(&anchor) {
                log::warn!(
                    "Failed to remove partially created {}: {}",
                    anchor.display(),
                    cleanup
                );
            }
        }
        return Err(e.into());
    }
    log::debug!(
        "Created {} (anchor {})",
        full.display(),
        anchor.display()
    );

    Ok(Undo::RemoveCreated {
        anchor: Some(anchor),
    })
}

fn execute_replace(
    source: PathBuf,
    destination: PathBuf,
    destination_backup: Option<PathBuf>,
    store: &TempStore,
) -> Result<Undo> {
    if !destination.is_file() {
        return Err(TxError::NotFound(destination));
    }

    // The platform backup name may be overwritten by the replace itself, so
    // both the destination and that name get private snapshots.
    let saved_destination = FileSnapshot::capture(&destination, store)?;
    let saved_backup_name = match &destination_backup {
        Some(name) => Some(FileSnapshot::capture(name, store)?),
        None => None,
    };

    primitives::replace(&source, &destination, destination_backup.as_deref())?;

    Ok(Undo::Replace {
        source,
        destination: saved_destination,
        backup_name: saved_backup_name,
    })
}

/// Backup state, one variant per undo strategy.
#[derive(Debug)]
enum Undo {
    Restore(FileSnapshot),
    MoveBack {
        source: PathBuf,
        destination: PathBuf,
        displaced: Option<FileSnapshot>,
    },
    Replace {
        source: PathBuf,
        destination: FileSnapshot,
        backup_name: Option<FileSnapshot>,
    },
    RestoreDirectory(DirectoryBackup),
    RemoveCreated {
        anchor: Option<PathBuf>,
    },
}

/// An executed operation holding what it needs to undo itself.
#[derive(Debug)]
pub struct AppliedOperation {
    kind: OperationKind,
    undo: Undo,
    rolled_back: bool,
}

impl AppliedOperation {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The path that rollback acts on.
    pub fn target(&self) -> &Path {
        match &self.undo {
            Undo::Restore(snapshot) => snapshot.target(),
            Undo::MoveBack { destination, .. } => destination,
            Undo::Replace { destination, .. } => destination.target(),
            Undo::RestoreDirectory(backup) => backup.target(),
            Undo::RemoveCreated { anchor } => anchor.as_deref().unwrap_or(Path::new("")),
        }
    }

    /// Path of the private backup, if one was taken.
    pub fn backup_path(&self) -> Option<&Path> {
        match &self.undo {
            Undo::Restore(snapshot) => snapshot.backup_path(),
            Undo::MoveBack { displaced, .. } => displaced.as_ref().and_then(|s| s.backup_path()),
            Undo::Replace { destination, .. } => destination.backup_path(),
            Undo::RestoreDirectory(backup) => backup.backup_path(),
            Undo::RemoveCreated { .. } => None,
        }
    }

    /// Undoes the mutation. Runs at most once.
    pub fn rollback(&mut self) -> io::Result<()> {
        if self.rolled_back {
            return Ok(());
        }
        self.rolled_back = true;

        log::debug!("Rolling back {}: {}", self.kind, self.target().display());

        match &mut self.undo {
            Undo::Restore(snapshot) => snapshot.restore(),
            Undo::MoveBack {
                source,
                destination,
                displaced,
            } => {
                primitives::move_file(destination, source)?;
                match displaced {
                    Some(snapshot) => snapshot.restore(),
                    None => Ok(()),
                }
            }
            Undo::Replace {
                source,
                destination,
                backup_name,
            } => {
                if !source.exists() && destination.target().is_file() {
                    primitives::move_file(destination.target(), source)?;
                }
                destination.restore()?;
                match backup_name {
                    Some(snapshot) => snapshot.restore(),
                    None => Ok(()),
                }
            }
            Undo::RestoreDirectory(backup) => backup.restore(),
            Undo::RemoveCreated { anchor } => match anchor {
                Some(anchor) if anchor.exists() => fs::remove_dir_all(anchor),
                _ => Ok(()),
            },
        }
    }

    /// Deletes backup artifacts. Idempotent.
    pub fn cleanup(&mut self) -> io::Result<()> {
        match &mut self.undo {
            Undo::Restore(snapshot) => snapshot.release(),
            Undo::MoveBack { displaced, .. } => match displaced {
                Some(snapshot) => snapshot.release(),
                None => Ok(()),
            },
            Undo::Replace {
                destination,
                backup_name,
                ..
            } => {
                let first = destination.release();
                let second = match backup_name {
                    Some(snapshot) => snapshot.release(),
                    None => Ok(()),
                };
                first.and(second)
            }
            Undo::RestoreDirectory(backup) => backup.release(),
            Undo::RemoveCreated { .. } => Ok(()),
        }
    }
}
