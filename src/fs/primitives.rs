//! Plain, non-transactional file system calls.
//!
//! Used directly when no transaction is active, and by operations as the
//! mutation step once their backup is in place.

use super::encoding::{Encoding, join_lines};
use crate::error::{Result, TxError};

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub fn write_bytes(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

pub fn write_text(path: &Path, contents: &str, encoding: Encoding) -> io::Result<()> {
    fs::write(path, encoding.encode_document(contents))
}

pub fn write_lines<S: AsRef<str>>(path: &Path, lines: &[S], encoding: Encoding) -> io::Result<()> {
    write_text(path, &join_lines(lines), encoding)
}

/// Appends text, creating the file if needed.
///
/// The encoding's byte-order mark is written only when the file is new or
/// empty.
pub fn append_text(path: &Path, contents: &str, encoding: Encoding) -> io::Result<()> {
    let is_empty = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_empty {
        file.write_all(encoding.preamble())?;
    }
    file.write_all(&encoding.encode(contents))?;
    file.flush()
}

pub fn append_lines<S: AsRef<str>>(
    path: &Path,
    lines: &[S],
    encoding: Encoding,
) -> io::Result<()> {
    append_text(path, &join_lines(lines), encoding)
}

/// Fails with `DestinationExists` unless `overwrite` is set or the path is free.
pub fn ensure_destination_free(destination: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && destination.exists() {
        return Err(TxError::DestinationExists(destination.to_path_buf()));
    }
    Ok(())
}

pub fn copy_file(source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    ensure_destination_free(destination, overwrite)?;
    fs::copy(source, destination)?;
    Ok(())
}

/// Renames a file, falling back to copy+delete across devices.
pub fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            log::debug!(
                "Cross-device move, copying {} → {}",
                source.display(),
                destination.display()
            );
            copy_then_remove(source, destination)
        }
        Err(e) => Err(e),
    }
}

/// Copies `source` over `destination`, then removes `source`.
///
/// On failure a destination created by the copy is removed. A destination
/// that existed beforehand is left in place, possibly overwritten; restoring
/// it is up to the caller.
fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    let existed = destination.exists();

    let result = fs::copy(source, destination).and_then(|_| fs::remove_file(source));
    if let Err(e) = result {
        if !existed && destination.exists() {
            if let Err(cleanup) = fs::remove_file(destination) {
                log::warn!(
                    "Failed to remove partial copy {}: {}",
                    destination.display(),
                    cleanup
                );
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Removes a file. A missing file is not an error.
pub fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Replaces `destination` with `source`.
///
/// When `destination_backup` is given the old destination is moved there
/// first. If moving `source` then fails, the destination is moved back so it
/// is left untouched.
pub fn replace(source: &Path, destination: &Path, destination_backup: Option<&Path>) -> Result<()> {
    if !destination.is_file() {
        return Err(TxError::NotFound(destination.to_path_buf()));
    }

    if let Some(backup) = destination_backup {
        move_file(destination, backup)?;
    }

    if let Err(e) = move_file(source, destination) {
        if let Some(backup) = destination_backup {
            if let Err(undo) = move_file(backup, destination) {
                log::warn!(
                    "Failed to move {} back to {}: {}",
                    backup.display(),
                    destination.display(),
                    undo
                );
            }
        }
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_writes_preamble_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log.txt");

        append_text(&path, "a", Encoding::Utf8Bom).unwrap();
        append_text(&path, "b", Encoding::Utf8Bom).unwrap();

        assert_eq!(fs::read(&path).unwrap(), [0xEF, 0xBB, 0xBF, b'a', b'b']);
    }

    #[test]
    fn test_copy_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        let destination = temp.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&destination, "old").unwrap();

        let result = copy_file(&source, &destination, false);
        assert!(matches!(result, Err(TxError::DestinationExists(_))));
        assert_eq!(fs::read_to_string(&destination).unwrap(), "old");

        copy_file(&source, &destination, true).unwrap();
        assert_eq!(fs::read_to_string(&destination).unwrap(), "new");
    }

    #[test]
    fn test_delete_missing_file_is_noop() {
        let temp = TempDir::new().unwrap();
        delete_file(&temp.path().join("missing")).unwrap();
    }

    #[test]
    fn test_replace_with_backup_name() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("new.cfg");
        let destination = temp.path().join("app.cfg");
        let backup = temp.path().join("app.cfg.bak");
        fs::write(&source, "v2").unwrap();
        fs::write(&destination, "v1").unwrap();

        replace(&source, &destination, Some(&backup)).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "v2");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "v1");
    }

    #[test]
    fn test_replace_failure_restores_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("missing.cfg");
        let destination = temp.path().join("app.cfg");
        let backup = temp.path().join("app.cfg.bak");
        fs::write(&destination, "v1").unwrap();

        let result = replace(&source, &destination, Some(&backup));

        assert!(matches!(result, Err(TxError::Io(_))));
        assert_eq!(fs::read_to_string(&destination).unwrap(), "v1");
        assert!(!backup.exists());
    }

    #[test]
    fn test_replace_requires_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        fs::write(&source, "x").unwrap();

        let result = replace(&source, &temp.path().join("b"), None);
        assert!(matches!(result, Err(TxError::NotFound(_))));
        assert!(source.exists());
    }

    /// Makes `dir` read-only. Returns false when permissions are not
    /// enforced (running as root), in which case the caller skips.
    #[cfg(unix)]
    fn lock_dir(dir: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(dir, fs::Permissions::from_mode(0o555)).unwrap();
        let check = dir.join(".write-check");
        if fs::write(&check, "").is_ok() {
            fs::remove_file(&check).unwrap();
            unlock_dir(dir);
            return false;
        }
        true
    }

    #[cfg(unix)]
    fn unlock_dir(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_then_remove_keeps_existing_destination() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let source = locked.join("a.txt");
        let destination = temp.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&destination, "old").unwrap();
        if !lock_dir(&locked) {
            return;
        }

        let result = copy_then_remove(&source, &destination);
        unlock_dir(&locked);

        assert!(result.is_err());
        assert!(source.exists());
        assert!(destination.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_then_remove_drops_created_destination() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let source = locked.join("a.txt");
        let destination = temp.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        if !lock_dir(&locked) {
            return;
        }

        let result = copy_then_remove(&source, &destination);
        unlock_dir(&locked);

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
        assert!(!destination.exists());
    }

    #[test]
    fn test_copy_then_remove_moves_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.txt");
        let destination = temp.path().join("b.txt");
        fs::write(&source, "x").unwrap();

        copy_then_remove(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "x");
    }
}
