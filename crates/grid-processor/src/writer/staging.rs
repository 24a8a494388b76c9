//! Staged directories and the two-rename promotion journal.
//!
//! A node is built completely under a staging path and then swapped into
//! place: `target -> target.prev`, `staged -> target`, then `target.prev` is
//! removed. If the process dies between the renames, [`recover`] puts the
//! previous node back; readers use [`resolve`] to find whichever copy is
//! authoritative in the meantime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Directory under the archive root holding partially built groups.
pub const STAGING_DIR: &str = ".staging";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Journal copy of `target` held during a swap.
pub fn prev_path(target: &Path) -> PathBuf {
    with_suffix(target, ".prev")
}

/// Sibling path where a replacement for `target` is built in place.
pub fn next_path(target: &Path) -> PathBuf {
    with_suffix(target, ".next")
}

/// A fresh staging directory for `name` under `root`.
pub fn staging_path(root: &Path, name: &str) -> PathBuf {
    root.join(STAGING_DIR)
        .join(format!("{}.{}", name, uuid::Uuid::new_v4()))
}

/// The directory readers should use for `target`, if any.
pub fn resolve(target: &Path) -> Option<PathBuf> {
    if target.exists() {
        return Some(target.to_path_buf());
    }
    let prev = prev_path(target);
    if prev.exists() {
        Some(prev)
    } else {
        None
    }
}

/// Finish or roll back an interrupted promotion of `target`.
///
/// Returns true when something had to be repaired.
pub fn recover(target: &Path) -> io::Result<bool> {
    let prev = prev_path(target);
    if !prev.exists() {
        return Ok(false);
    }
    if target.exists() {
        // Crashed after the second rename; the new node is already in place
        debug!(path = %prev.display(), "Removing stale journal copy");
        fs::remove_dir_all(&prev)?;
    } else {
        warn!(path = %target.display(), "Rolling back interrupted promotion");
        fs::rename(&prev, target)?;
    }
    Ok(true)
}

/// Atomically replace (or create) `target` with the fully built `staged`.
pub fn promote(staged: &Path, target: &Path) -> io::Result<()> {
    recover(target)?;
    let prev = prev_path(target);

    if target.exists() {
        fs::rename(target, &prev)?;
    }
    if let Err(e) = fs::rename(staged, target) {
        if prev.exists() {
            fs::rename(&prev, target)?;
        }
        return Err(e);
    }
    if prev.exists() {
        fs::remove_dir_all(&prev)?;
    }
    Ok(())
}

/// Remove staging directories for `name` left by an interrupted writer.
///
/// Only call while holding the group lock for `name`.
pub fn sweep(root: &Path, name: &str) -> usize {
    let dir = root.join(STAGING_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to list staging directory");
            return 0;
        }
    };

    let prefix = format!("{}.", name);
    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed abandoned staging directory");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
        }
    }
    removed
}

/// Best-effort removal of a staging directory after a failed write.
pub fn discard(staged: &Path) {
    if staged.exists() {
        if let Err(e) = fs::remove_dir_all(staged) {
            warn!(path = %staged.display(), error = %e, "Failed to remove staging directory");
        }
    }
}
