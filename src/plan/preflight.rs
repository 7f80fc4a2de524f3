//! Pre-flight checks run before a plan touches the file system.
//!
//! Steps are simulated in order against an overlay of the current tree, so a
//! step may rely on files or directories produced by earlier steps. Only
//! failures that the engine would report as precondition errors are caught
//! here; I/O failures during the real run still roll everything back.

use super::{Plan, Step};
use crate::error::{Result, TxError};
use crate::fs::Operation;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Projected state of the tree after the steps simulated so far.
#[derive(Default)]
struct Overlay {
    files: HashMap<PathBuf, bool>,
    dirs: HashMap<PathBuf, bool>,
    removed_dirs: Vec<PathBuf>,
}

impl Overlay {
    fn under_removed(&self, path: &Path) -> bool {
        self.removed_dirs.iter().any(|d| path.starts_with(d))
    }

    fn file_exists(&self, path: &Path) -> bool {
        match self.files.get(path) {
            Some(&exists) => exists,
            None => !self.under_removed(path) && path.is_file(),
        }
    }

    fn dir_exists(&self, path: &Path) -> bool {
        match self.dirs.get(path) {
            Some(&exists) => exists,
            None => !self.under_removed(path) && path.is_dir(),
        }
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.dir_exists(parent),
            _ => true,
        }
    }

    fn set_file(&mut self, path: &Path, exists: bool) {
        self.files.insert(path.to_path_buf(), exists);
    }

    fn create_dir(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || self.dir_exists(ancestor) {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf(), true);
        }
    }

    fn remove_dir(&mut self, path: &Path) {
        self.files.retain(|p, _| !p.starts_with(path));
        self.dirs.retain(|p, _| !p.starts_with(path));
        self.dirs.insert(path.to_path_buf(), false);
        self.removed_dirs.push(path.to_path_buf());
    }
}

/// Validates every step of `plan`.
///
/// # Checks Performed
///
/// 1. The plan contains at least one step
/// 2. Sources of copy, move and replace exist when the step runs
/// 3. Destinations of copy and move are free unless `overwrite` is set
/// 4. Parent directories exist for every file a step writes
/// 5. Directories are not created over existing files
///
/// # Errors
///
/// Returns the first failing check as `TxError::Plan`. Nothing is modified.
pub fn preflight_checks(plan: &Plan) -> Result<()> {
    if plan.is_empty() {
        return Err(TxError::Plan("plan contains no steps".to_string()));
    }

    let mut overlay = Overlay::default();
    for step in plan.steps() {
        check_step(step, &mut overlay, plan.base())?;
    }

    log::debug!("Pre-flight checks passed for {} step(s)", plan.len());
    Ok(())
}

struct StepCheck<'a> {
    number: usize,
    base: &'a Path,
}

impl StepCheck<'_> {
    fn fail(&self, message: String) -> TxError {
        TxError::Plan(format!("step {}: {}", self.number, message))
    }

    fn show(&self, path: &Path) -> String {
        pathdiff::diff_paths(path, self.base)
            .unwrap_or_else(|| path.to_path_buf())
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn writable(&self, overlay: &Overlay, path: &Path) -> Result<()> {
        if overlay.dir_exists(path) {
            return Err(self.fail(format!("{} is a directory", self.show(path))));
        }
        if !overlay.parent_exists(path) {
            return Err(self.fail(format!(
                "parent directory of {} does not exist",
                self.show(path)
            )));
        }
        Ok(())
    }
}

fn check_step(step: &Step, overlay: &mut Overlay, base: &Path) -> Result<()> {
    let check = StepCheck {
        number: step.number,
        base,
    };

    match &step.operation {
        Operation::WriteText { path, .. }
        | Operation::WriteBytes { path, .. }
        | Operation::WriteLines { path, .. }
        | Operation::AppendText { path, .. }
        | Operation::AppendLines { path, .. } => {
            check.writable(overlay, path)?;
            overlay.set_file(path, true);
        }
        Operation::Copy {
            source,
            destination,
            overwrite,
        }
        | Operation::Move {
            source,
            destination,
            overwrite,
        } => {
            if !overlay.file_exists(source) {
                let shown = check.show(source);
                return Err(check.fail(format!("source {} does not exist", shown)));
            }
            if !overwrite && overlay.file_exists(destination) {
                return Err(check.fail(format!(
                    "destination {} exists (set overwrite = true)",
                    check.show(destination)
                )));
            }
            check.writable(overlay, destination)?;
            if matches!(step.operation, Operation::Move { .. }) {
                overlay.set_file(source, false);
            }
            overlay.set_file(destination, true);
        }
        Operation::Replace {
            source,
            destination,
            destination_backup,
        } => {
            if !overlay.file_exists(source) {
                let shown = check.show(source);
                return Err(check.fail(format!("source {} does not exist", shown)));
            }
            if !overlay.file_exists(destination) {
                let shown = check.show(destination);
                return Err(check.fail(format!("destination {} does not exist", shown)));
            }
            if let Some(backup) = destination_backup {
                check.writable(overlay, backup)?;
                overlay.set_file(backup, true);
            }
            overlay.set_file(source, false);
            overlay.set_file(destination, true);
        }
        Operation::Delete { path } => {
            if overlay.dir_exists(path) {
                let shown = check.show(path);
                return Err(check.fail(format!("{} is a directory (use rmdir)", shown)));
            }
            overlay.set_file(path, false);
        }
        Operation::CreateDirectory { path } => {
            if overlay.file_exists(path) {
                return Err(check.fail(format!("{} is a file", check.show(path))));
            }
            overlay.create_dir(path);
        }
        Operation::DeleteDirectory { path } => {
            if overlay.file_exists(path) {
                let shown = check.show(path);
                return Err(check.fail(format!("{} is a file (use delete)", shown)));
            }
            overlay.remove_dir(path);
        }
        Operation::Snapshot { .. } => {}
    }

    Ok(())
}
