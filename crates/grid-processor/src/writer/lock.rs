//! Single-writer lock per archive group.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{GridProcessorError, Result};

/// Directory under the archive root holding lock files.
pub const LOCK_DIR: &str = ".locks";

/// Exclusive lock on one group, released on drop.
///
/// The lock file is created with `create_new`, so a second writer fails
/// immediately instead of waiting. A lock whose holder process is gone, or
/// that is older than the lease, is broken and taken over.
#[derive(Debug)]
pub struct GroupLock {
    path: PathBuf,
}

/// Holder recorded in a lock file.
#[derive(Debug, Default, PartialEq)]
struct Holder {
    pid: Option<u32>,
    acquired: Option<DateTime<Utc>>,
}

impl Holder {
    fn parse(contents: &str) -> Self {
        let mut holder = Holder::default();
        for field in contents.split_whitespace() {
            if let Some(v) = field.strip_prefix("pid=") {
                holder.pid = v.parse().ok();
            } else if let Some(v) = field.strip_prefix("acquired=") {
                holder.acquired = DateTime::parse_from_rfc3339(v)
                    .ok()
                    .map(|d| d.with_timezone(&Utc));
            }
        }
        holder
    }
}

impl GroupLock {
    /// Take the lock for `group`, breaking it if its holder is stale.
    pub fn acquire(root: &Path, group: &str, lease: Duration) -> Result<Self> {
        let dir = root.join(LOCK_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.lock", group));

        match Self::create(&path) {
            Err(GridProcessorError::ArchiveLocked(_)) if is_stale(&path, lease) => {
                warn!(path = %path.display(), "Breaking stale group lock");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(GridProcessorError::ArchiveLocked(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(
            file,
            "pid={} acquired={}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for GroupLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release group lock");
        }
    }
}

/// Whether the lock at `path` was left by a dead process or outlived `lease`.
fn is_stale(path: &Path, lease: Duration) -> bool {
    let holder = fs::read_to_string(path)
        .map(|c| Holder::parse(&c))
        .unwrap_or_default();

    if let Some(pid) = holder.pid {
        if pid != std::process::id() && !process_alive(pid) {
            return true;
        }
    }

    // A writer killed before recording its holder line leaves an empty file
    let acquired = holder.acquired.map(SystemTime::from).or_else(|| {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    });
    match acquired.and_then(|t| SystemTime::now().duration_since(t).ok()) {
        Some(age) => age > lease,
        None => false,
    }
}

/// Liveness from procfs; assumes alive where procfs is unavailable.
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.join("self").exists() {
        return true;
    }
    proc_root.join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(3600);

    #[test]
    fn test_lock_is_exclusive() {
        let root = tempfile::tempdir().unwrap();
        let lock = GroupLock::acquire(root.path(), "nside_8", LEASE).unwrap();
        assert!(lock.path().exists());

        assert!(matches!(
            GroupLock::acquire(root.path(), "nside_8", LEASE),
            Err(GridProcessorError::ArchiveLocked(_))
        ));
        // Other groups are independent
        let _other = GroupLock::acquire(root.path(), "nside_16", LEASE).unwrap();

        drop(lock);
        assert!(GroupLock::acquire(root.path(), "nside_8", LEASE).is_ok());
    }

    #[test]
    fn test_expired_lease_is_broken() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(LOCK_DIR);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nside_8.lock");
        fs::write(
            &path,
            format!("pid={} acquired=2000-01-01T00:00:00+00:00\n", std::process::id()),
        )
        .unwrap();

        let lock = GroupLock::acquire(root.path(), "nside_8", LEASE).unwrap();
        let holder = Holder::parse(&fs::read_to_string(lock.path()).unwrap());
        assert_eq!(holder.pid, Some(std::process::id()));
        assert!(holder.acquired.unwrap() > Utc::now() - chrono::Duration::minutes(1));
    }

    #[test]
    fn test_live_recent_holder_is_respected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(LOCK_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("nside_8.lock"),
            format!("pid={} acquired={}\n", std::process::id(), Utc::now().to_rfc3339()),
        )
        .unwrap();

        assert!(matches!(
            GroupLock::acquire(root.path(), "nside_8", LEASE),
            Err(GridProcessorError::ArchiveLocked(_))
        ));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_dead_holder_is_broken() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(LOCK_DIR);
        fs::create_dir_all(&dir).unwrap();
        // Above the default pid_max, so never a live process
        fs::write(
            dir.join("nside_8.lock"),
            format!("pid=4194305 acquired={}\n", Utc::now().to_rfc3339()),
        )
        .unwrap();

        assert!(GroupLock::acquire(root.path(), "nside_8", LEASE).is_ok());
    }

    #[test]
    fn test_holder_parse() {
        let holder = Holder::parse("pid=42 acquired=2024-12-01T00:00:00+00:00\n");
        assert_eq!(holder.pid, Some(42));
        assert_eq!(
            holder.acquired.map(|t| t.to_rfc3339()),
            Some("2024-12-01T00:00:00+00:00".to_string())
        );
        assert_eq!(Holder::parse(""), Holder::default());
    }
}
