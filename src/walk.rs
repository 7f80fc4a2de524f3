//! Read-only directory listing.

use crate::error::{Result, TxError};

use ignore::WalkBuilder;
use std::ops::ControlFlow;
use std::path::Path;

/// Calls `handler` for every file below `root`.
///
/// Entries are visited in file-name order. With `recursive = false` only the
/// immediate children are listed. Returning `ControlFlow::Break` from the
/// handler stops the whole walk, not just the current directory. Nothing is
/// filtered: hidden files and ignore files are treated like any other entry.
pub fn get_files<F>(root: &Path, recursive: bool, mut handler: F) -> Result<()>
where
    F: FnMut(&Path) -> ControlFlow<()>,
{
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if !recursive {
        builder.max_depth(Some(1));
    }

    for entry in builder.build() {
        let entry = entry.map_err(walk_error)?;
        let is_file = entry.file_type().is_some_and(|t| t.is_file());
        if !is_file {
            continue;
        }

        if handler(entry.path()).is_break() {
            log::debug!("Walk of {} stopped at {}", root.display(), entry.path().display());
            break;
        }
    }

    Ok(())
}

fn walk_error(error: ignore::Error) -> TxError {
    let message = error.to_string();
    match error.into_io_error() {
        Some(io) => TxError::Io(io),
        None => TxError::Other(anyhow::anyhow!(message)),
    }
}
