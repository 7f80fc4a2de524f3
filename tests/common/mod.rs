//! Shared helpers for txfs integration tests.
//!
//! Every test works inside its own `TempDir` and points the file manager's
//! backup storage at a subdirectory of it, so leftover backups can be
//! counted.

use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use txfs::{FileManager, ManagerConfig, Relocation};

/// Name of the backup directory inside each test's temp dir.
#[allow(unused)]
pub const BACKUP_DIR: &str = ".txfs-backups";

/// File manager whose backups live in `<temp>/.txfs-backups`
#[allow(unused)]
pub fn manager(temp: &TempDir) -> FileManager {
    manager_with(temp, Relocation::Auto)
}

#[allow(unused)]
pub fn manager_with(temp: &TempDir, relocation: Relocation) -> FileManager {
    FileManager::with_config(
        ManagerConfig::default()
            .temp_root(temp.path().join(BACKUP_DIR))
            .relocation(relocation),
    )
}

/// Number of entries left in the backup directory
#[allow(unused)]
pub fn backups_left(temp: &TempDir) -> usize {
    match fs::read_dir(temp.path().join(BACKUP_DIR)) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

/// Creates a small tree:
///
/// ```text
/// tree/
///   root.txt        "root"
///   sub/a.txt       "a"
///   sub/deep/b.txt  "b"
///   empty/
/// ```
#[allow(unused)]
pub fn create_tree(base: &Path) -> PathBuf {
    let tree = base.join("tree");
    fs::create_dir_all(tree.join("sub/deep")).unwrap();
    fs::create_dir_all(tree.join("empty")).unwrap();
    fs::write(tree.join("root.txt"), "root").unwrap();
    fs::write(tree.join("sub/a.txt"), "a").unwrap();
    fs::write(tree.join("sub/deep/b.txt"), "b").unwrap();
    tree
}

/// Asserts that `tree` matches what `create_tree` produced
#[allow(unused)]
pub fn assert_tree_intact(tree: &Path) {
    assert_eq!(fs::read_to_string(tree.join("root.txt")).unwrap(), "root");
    assert_eq!(fs::read_to_string(tree.join("sub/a.txt")).unwrap(), "a");
    assert_eq!(fs::read_to_string(tree.join("sub/deep/b.txt")).unwrap(), "b");
    assert!(tree.join("empty").is_dir());
}

#[allow(unused)]
pub fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

/// Writes `plan.toml` into `dir` and returns its path
#[allow(unused)]
pub fn write_plan(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("plan.toml");
    fs::write(&path, content).unwrap();
    path
}

/// Helper to run `txfs apply` with backups kept inside `temp`
#[allow(unused)]
pub fn run_apply(temp: &TempDir, plan: &Path, extra_args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("txfs");
    cmd.arg("apply")
        .arg(plan)
        .arg("--temp-dir")
        .arg(temp.path().join(BACKUP_DIR))
        .args(extra_args)
        .current_dir(temp.path());

    cmd.assert()
}
