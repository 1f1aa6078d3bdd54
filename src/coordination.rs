//! # File-System Coordination
//!
//! Every PSHELL server and control-client endpoint that binds a UNIX socket
//! drops an advisory lockfile alongside it in a shared coordination
//! directory (`/tmp/.pshell` by default, overridable via `PSHELL_LOCK_DIR`).
//! The lockfile both reserves a socket name against concurrent binders in
//! the same process tree and lets a restarting process detect and reclaim a
//! socket path left behind by a process that died without cleaning up.
//!
//! ## Key Components
//!
//! - **CoordinationDir**: resolves and creates the shared lock directory
//! - **Lockfile**: an advisory-locked file guarding one socket path
//! - reclaim helpers used by [`crate::server::Server`] binding and
//!   [`crate::control::ControlClient`] connecting

use anyhow::{Context, Result};
use fs4::tokio::AsyncFileExt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};

/// Default coordination directory, matching the upstream `/tmp/.pshell`.
pub const DEFAULT_LOCK_DIR: &str = "/tmp/.pshell";

/// Resolves the coordination directory: `$PSHELL_LOCK_DIR` if set, else
/// [`DEFAULT_LOCK_DIR`], creating it if necessary.
pub async fn coordination_dir() -> Result<PathBuf> {
    let dir = std::env::var("PSHELL_LOCK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCK_DIR));
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating coordination directory {}", dir.display()))?;
    Ok(dir)
}

/// Builds the lockfile path for a UNIX server socket: `<dir>/<name>-unix.lock`.
pub fn unix_server_lock_path(dir: &Path, server_name: &str) -> PathBuf {
    dir.join(format!("{server_name}-unix.lock"))
}

/// Builds the lockfile path for a UDP/TCP server: `<dir>/<name>-<type>-<host>-<port>.lock`.
pub fn inet_server_lock_path(dir: &Path, server_name: &str, transport: &str, host: &str, port: u16) -> PathBuf {
    dir.join(format!("{server_name}-{transport}-{host}-{port}.lock"))
}

/// Builds the lockfile path for a control client's locally-bound UNIX
/// source socket: `<dir>/<socket_name>.lock`.
pub fn control_source_lock_path(dir: &Path, socket_name: &str) -> PathBuf {
    dir.join(format!("{socket_name}.lock"))
}

/// An advisory-locked file guarding exclusive use of one socket path.
///
/// Held for the lifetime of whatever owns the socket; dropping it releases
/// the OS-level lock (though the file itself, and the socket special file
/// it guards, are unlinked explicitly by the owner on clean shutdown).
pub struct Lockfile {
    path: PathBuf,
    file: File,
}

impl Lockfile {
    /// Attempts to acquire an exclusive, non-blocking lock at `path`.
    ///
    /// Returns `Ok(None)` (not an error) if the lockfile is already held by
    /// a live process — callers use this to decide whether to try the next
    /// candidate name/port in a bind-retry loop, rather than to propagate a
    /// hard failure.
    pub async fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
            .with_context(|| format!("opening lockfile {}", path.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Lockfile {
                path: path.to_path_buf(),
                file,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock and removes the lockfile from disk.
    pub async fn release(self) -> Result<()> {
        let path = self.path.clone();
        AsyncFileExt::unlock(&self.file).ok();
        drop(self.file);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("removing lockfile {}", path.display()))?;
        Ok(())
    }
}

/// Scans `dir` for lockfiles whose corresponding socket path no longer has
/// a live holder, removing both the stale lockfile and (if present) the
/// stale UNIX socket special file it names.
///
/// A lockfile is "stale" if a non-blocking exclusive lock attempt against
/// it succeeds immediately — meaning no other process currently holds it.
/// This mirrors the upstream `_cleanupFileSystemResources` scan that runs
/// at server/control-client startup before attempting a fresh bind.
pub async fn reclaim_stale(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reclaimed = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(reclaimed),
        Err(e) => return Err(e).with_context(|| format!("reading coordination directory {}", dir.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        match Lockfile::try_acquire(&path).await {
            Ok(Some(lock)) => {
                debug!("reclaiming stale lockfile {}", path.display());
                // Only UNIX-server lockfiles (`<name>-unix.lock`) name a
                // socket special file to reclaim alongside them; UDP/TCP
                // inet lockfiles and control-source lockfiles don't.
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Some(server_name) = stem.strip_suffix("-unix") {
                        let socket_path = dir.join(server_name);
                        if socket_path.exists() {
                            let _ = tokio::fs::remove_file(&socket_path).await;
                        }
                    }
                }
                lock.release().await?;
                reclaimed.push(path);
            }
            Ok(None) => {
                // Still held by a live process; leave it alone.
            }
            Err(e) => warn!("could not inspect lockfile {}: {e}", path.display()),
        }
    }
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo-unix.lock");
        let lock = Lockfile::try_acquire(&path).await.unwrap();
        assert!(lock.is_some());
        lock.unwrap().release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn second_acquire_while_held_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo-unix.lock");
        let first = Lockfile::try_acquire(&path).await.unwrap();
        assert!(first.is_some());
        let second = Lockfile::try_acquire(&path).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn reclaims_lockfile_with_no_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("demo-unix.lock");
        let socket_path = dir.path().join("demo");
        tokio::fs::write(&lock_path, b"").await.unwrap();
        tokio::fs::write(&socket_path, b"").await.unwrap();

        let reclaimed = reclaim_stale(dir.path()).await.unwrap();
        assert_eq!(reclaimed, vec![lock_path.clone()]);
        assert!(!lock_path.exists());
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn leaves_actively_held_lockfile_alone() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("demo-unix.lock");
        let held = Lockfile::try_acquire(&lock_path).await.unwrap().unwrap();

        let reclaimed = reclaim_stale(dir.path()).await.unwrap();
        assert!(reclaimed.is_empty());
        assert!(lock_path.exists());
        held.release().await.unwrap();
    }
}
