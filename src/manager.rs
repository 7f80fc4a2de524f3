//! Transactional file manager.
//!
//! Every mutating method takes the transaction it runs under:
//!
//! - `None`: the plain file system call runs directly, no backup, no log
//! - `Some(tx)` with `tx` active: the matching [`Operation`] is executed
//!   immediately (backup first) and enlisted into the transaction's undo log
//! - `Some(tx)` no longer active: `Registration` error, nothing is touched
//!
//! Existence checks and [`FileManager::get_files`] never enlist.

use crate::error::{Result, TxError};
use crate::fs::{Encoding, Operation, Relocation, TempStore};
use crate::txn::{ParticipantRegistry, TransactionContext, TxParticipant};
use crate::walk;

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension used by [`FileManager::temp_file_name`] when none is given.
pub const DEFAULT_TEMP_EXTENSION: &str = "tmp";

/// File manager settings.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Private root for backups and temp names. `None` uses the
    /// process-wide store under the system temp directory.
    pub temp_root: Option<PathBuf>,
    /// How deleted directories are moved into backup storage.
    pub relocation: Relocation,
}

impl ManagerConfig {
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn relocation(mut self, relocation: Relocation) -> Self {
        self.relocation = relocation;
        self
    }
}

/// Entry point for transactional and direct file operations.
#[derive(Clone)]
pub struct FileManager {
    temp: Arc<TempStore>,
    registry: Arc<ParticipantRegistry>,
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileManager {
    /// Creates a manager backed by the process-wide temp store.
    pub fn new() -> Self {
        Self {
            temp: TempStore::global(),
            registry: ParticipantRegistry::new(),
        }
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let temp = match config.temp_root {
            Some(root) => Arc::new(TempStore::new(root, config.relocation)),
            None if config.relocation == Relocation::Auto => TempStore::global(),
            None => Arc::new(TempStore::new(
                TempStore::global().root().to_path_buf(),
                config.relocation,
            )),
        };

        Self {
            temp,
            registry: ParticipantRegistry::new(),
        }
    }

    pub fn temp_store(&self) -> &TempStore {
        &self.temp
    }

    /// The undo log for `tx`, if any operation has been enlisted into it.
    pub fn participant(&self, tx: &dyn TransactionContext) -> Option<Arc<TxParticipant>> {
        self.registry.get(tx.id())
    }

    /// Routes one operation to direct execution or execute-then-enlist.
    pub fn submit(&self, tx: Option<&dyn TransactionContext>, operation: Operation) -> Result<()> {
        let Some(ctx) = tx else {
            log::debug!("Direct {}", operation.describe());
            return operation.run_direct();
        };

        if !ctx.is_active() {
            return Err(TxError::Registration(format!(
                "{} is not active; refusing {}",
                ctx.id(),
                operation.describe()
            )));
        }

        let applied = operation.execute(&self.temp)?;
        self.registry.participant_for(ctx.id()).enlist(ctx, applied)
    }

    pub fn write_text(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        contents: &str,
    ) -> Result<()> {
        self.write_text_with(tx, path, contents, Encoding::default())
    }

    pub fn write_text_with(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        contents: &str,
        encoding: Encoding,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::WriteText {
                path: path.as_ref().to_path_buf(),
                contents: contents.to_string(),
                encoding,
            },
        )
    }

    pub fn write_bytes(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        contents: &[u8],
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::WriteBytes {
                path: path.as_ref().to_path_buf(),
                contents: contents.to_vec(),
            },
        )
    }

    pub fn write_lines<I, S>(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        lines: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_lines_with(tx, path, lines, Encoding::default())
    }

    pub fn write_lines_with<I, S>(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        lines: I,
        encoding: Encoding,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submit(
            tx,
            Operation::WriteLines {
                path: path.as_ref().to_path_buf(),
                lines: lines.into_iter().map(Into::into).collect(),
                encoding,
            },
        )
    }

    pub fn append_text(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        contents: &str,
    ) -> Result<()> {
        self.append_text_with(tx, path, contents, Encoding::default())
    }

    pub fn append_text_with(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        contents: &str,
        encoding: Encoding,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::AppendText {
                path: path.as_ref().to_path_buf(),
                contents: contents.to_string(),
                encoding,
            },
        )
    }

    pub fn append_lines<I, S>(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        lines: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.append_lines_with(tx, path, lines, Encoding::default())
    }

    pub fn append_lines_with<I, S>(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
        lines: I,
        encoding: Encoding,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submit(
            tx,
            Operation::AppendLines {
                path: path.as_ref().to_path_buf(),
                lines: lines.into_iter().map(Into::into).collect(),
                encoding,
            },
        )
    }

    /// Copies a file. Fails with `DestinationExists` unless `overwrite`.
    pub fn copy(
        &self,
        tx: Option<&dyn TransactionContext>,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::Copy {
                source: source.as_ref().to_path_buf(),
                destination: destination.as_ref().to_path_buf(),
                overwrite,
            },
        )
    }

    /// Moves a file. Fails with `DestinationExists` unless `overwrite`.
    pub fn move_file(
        &self,
        tx: Option<&dyn TransactionContext>,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::Move {
                source: source.as_ref().to_path_buf(),
                destination: destination.as_ref().to_path_buf(),
                overwrite,
            },
        )
    }

    /// Deletes a file. Missing files are ignored.
    pub fn delete(&self, tx: Option<&dyn TransactionContext>, path: impl AsRef<Path>) -> Result<()> {
        self.submit(
            tx,
            Operation::Delete {
                path: path.as_ref().to_path_buf(),
            },
        )
    }

    /// Deletes a directory and everything below it.
    pub fn delete_directory(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::DeleteDirectory {
                path: path.as_ref().to_path_buf(),
            },
        )
    }

    /// Creates a directory and any missing parents.
    pub fn create_directory(
        &self,
        tx: Option<&dyn TransactionContext>,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::CreateDirectory {
                path: path.as_ref().to_path_buf(),
            },
        )
    }

    /// Replaces `destination` with `source`, optionally keeping the old
    /// destination at `destination_backup`.
    pub fn replace(
        &self,
        tx: Option<&dyn TransactionContext>,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        destination_backup: Option<&Path>,
    ) -> Result<()> {
        self.submit(
            tx,
            Operation::Replace {
                source: source.as_ref().to_path_buf(),
                destination: destination.as_ref().to_path_buf(),
                destination_backup: destination_backup.map(Path::to_path_buf),
            },
        )
    }

    /// Backs up `path` so a later unprotected change is undone on rollback.
    ///
    /// Does nothing outside a transaction.
    pub fn snapshot(&self, tx: Option<&dyn TransactionContext>, path: impl AsRef<Path>) -> Result<()> {
        self.submit(
            tx,
            Operation::Snapshot {
                path: path.as_ref().to_path_buf(),
            },
        )
    }

    pub fn file_exists(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    pub fn directory_exists(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().is_dir()
    }

    /// Allocates a unique, not yet existing file name in the temp root.
    ///
    /// Inside a transaction the name is snapshotted, so anything written to
    /// it is removed on rollback.
    pub fn temp_file_name(
        &self,
        tx: Option<&dyn TransactionContext>,
        extension: Option<&str>,
    ) -> Result<PathBuf> {
        let path = self
            .temp
            .unique_path(extension.unwrap_or(DEFAULT_TEMP_EXTENSION))?;
        self.snapshot(tx, &path)?;
        Ok(path)
    }

    /// Creates a uniquely named directory under the system temp directory.
    pub fn temp_directory(&self, tx: Option<&dyn TransactionContext>) -> Result<PathBuf> {
        self.temp_directory_in(tx, std::env::temp_dir(), "")
    }

    /// Creates `parent/<prefix><16 hex chars>`.
    pub fn temp_directory_in(
        &self,
        tx: Option<&dyn TransactionContext>,
        parent: impl AsRef<Path>,
        prefix: &str,
    ) -> Result<PathBuf> {
        let dir = TempStore::unique_dir_name(parent.as_ref(), prefix);
        self.create_directory(tx, &dir)?;
        Ok(dir)
    }

    /// Visits files below `root`; see [`walk::get_files`].
    pub fn get_files<F>(&self, root: impl AsRef<Path>, recursive: bool, handler: F) -> Result<()>
    where
        F: FnMut(&Path) -> ControlFlow<()>,
    {
        walk::get_files(root.as_ref(), recursive, handler)
    }
}
