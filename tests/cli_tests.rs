mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{backups_left, read, run_apply, write_plan};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_apply_commits_every_step() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("draft.txt"), "draft").unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "mkdir"
path = "out/nested"

[[step]]
op = "write"
path = "out/nested/hello.txt"
contents = "hello"

[[step]]
op = "append-lines"
path = "out/nested/hello.txt"
lines = ["", "world"]

[[step]]
op = "move"
from = "draft.txt"
to = "out/final.txt"
"#,
    );

    run_apply(&temp, &plan, &[])
        .success()
        .stdout(predicate::str::contains("Applied"))
        .stdout(predicate::str::contains("move draft.txt → out/final.txt"));

    assert!(read(temp.path().join("out/nested/hello.txt")).starts_with("hello"));
    assert_eq!(read(temp.path().join("out/final.txt")), "draft");
    assert!(!temp.path().join("draft.txt").exists());
    assert_eq!(backups_left(&temp), 0);
}

#[test]
fn test_failed_step_rolls_back_earlier_steps() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.txt"), "original").unwrap();
    // Passes pre-flight, but the file name is too long for the file system.
    let too_long = "x".repeat(300);
    let plan = write_plan(
        temp.path(),
        &format!(
            r#"
[[step]]
op = "write"
path = "config.txt"
contents = "changed"

[[step]]
op = "mkdir"
path = "created"

[[step]]
op = "write"
path = "created/{}"
contents = "never"
"#,
            too_long
        ),
    );

    run_apply(&temp, &plan, &[])
        .failure()
        .stderr(predicate::str::contains("step 3"))
        .stderr(predicate::str::contains("Rollback successful"));

    assert_eq!(read(temp.path().join("config.txt")), "original");
    assert!(!temp.path().join("created").exists());
    assert_eq!(backups_left(&temp), 0);
}

#[test]
fn test_abort_flag_rolls_back() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("keep.txt"), "keep").unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "delete"
path = "keep.txt"

[[step]]
op = "write"
path = "new.txt"
contents = "new"
"#,
    );

    run_apply(&temp, &plan, &["--abort"])
        .success()
        .stdout(predicate::str::contains("Rehearsal complete"));

    assert_eq!(read(temp.path().join("keep.txt")), "keep");
    assert!(!temp.path().join("new.txt").exists());
}

#[test]
fn test_dry_run_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "write"
path = "never.txt"
contents = "x"
"#,
    );

    run_apply(&temp, &plan, &["--dry-run"])
        .success()
        .stdout(predicate::str::contains("write-text never.txt"))
        .stdout(predicate::str::contains("Dry run"));

    assert!(!temp.path().join("never.txt").exists());
}

#[test]
fn test_preflight_rejects_missing_source() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "write"
path = "a.txt"
contents = "a"

[[step]]
op = "copy"
from = "missing.txt"
to = "b.txt"
"#,
    );

    run_apply(&temp, &plan, &[])
        .failure()
        .stderr(predicate::str::contains("step 2: source missing.txt does not exist"));

    assert!(!temp.path().join("a.txt").exists());
}

#[test]
fn test_rejects_paths_outside_plan_directory() {
    let temp = TempDir::new().unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "delete"
path = "../outside.txt"
"#,
    );

    run_apply(&temp, &plan, &[])
        .failure()
        .stderr(predicate::str::contains("contains '..'"));
}

#[test]
fn test_copy_fallback_directory_delete_commit() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("old/inner")).unwrap();
    fs::write(temp.path().join("old/inner/x.txt"), "x").unwrap();
    let plan = write_plan(
        temp.path(),
        r#"
[[step]]
op = "rmdir"
path = "old"
"#,
    );

    run_apply(&temp, &plan, &["--copy-fallback"]).success();

    assert!(!temp.path().join("old").exists());
    assert_eq!(backups_left(&temp), 0);
}

#[test]
fn test_missing_plan_file() {
    let temp = TempDir::new().unwrap();

    run_apply(&temp, &temp.path().join("nope.toml"), &[])
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_help_lists_apply() {
    let mut cmd = cargo_bin_cmd!("txfs");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"));
}
