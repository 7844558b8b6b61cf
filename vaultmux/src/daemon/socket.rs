//! Listening socket setup and removal.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};

use crate::error::MuxError;

/// How long to wait for a half-started peer daemon to become connectable
/// before treating an existing socket file as stale.
const LIVE_CHECK_ATTEMPTS: u32 = 5;
const LIVE_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Bind the client-facing socket at `path`, owner-only (0600).
///
/// # Errors
///
/// - `AlreadyRunning` if another process accepts connections on `path`
/// - `Bind` if the directory or socket cannot be created
pub async fn bind_listener(path: &Path) -> Result<UnixListener, MuxError> {
    let bind_err = |source: std::io::Error| MuxError::Bind {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(bind_err)?;
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            for _ in 0..LIVE_CHECK_ATTEMPTS {
                if UnixStream::connect(path).await.is_ok() {
                    return Err(MuxError::AlreadyRunning {
                        path: path.to_path_buf(),
                    });
                }
                tokio::time::sleep(LIVE_CHECK_INTERVAL).await;
            }

            tracing::info!(path = %path.display(), "removing stale listening socket");
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(bind_err(e)),
            }
            UnixListener::bind(path).map_err(bind_err)?
        }
        Err(e) => return Err(bind_err(e)),
    };

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        let _ = std::fs::remove_file(path);
        return Err(bind_err(e));
    }
    tracing::info!(path = %path.display(), "listening for clients");
    Ok(listener)
}

fn socket_inode(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.ino())
}

/// Removes the listening socket file exactly once.
///
/// The inode at the path is recorded when the guard is created, right after
/// binding. The file is only removed while that inode is still there, so a
/// socket another daemon bound at the same path in the meantime is left alone.
///
/// Call [`SocketCleanup::remove`] on the normal shutdown path; dropping the
/// guard without it removes the file as well.
#[derive(Debug)]
pub struct SocketCleanup {
    path: PathBuf,
    inode: Option<u64>,
    removed: bool,
}

impl SocketCleanup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            inode: socket_inode(&path),
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the socket file. Later calls (and the drop) do nothing.
    pub fn remove(&mut self) {
        if std::mem::replace(&mut self.removed, true) {
            return;
        }
        let current = socket_inode(&self.path);
        if self.inode.is_none() || current != self.inode {
            tracing::debug!(
                path = %self.path.display(),
                bound_inode = ?self.inode,
                current_inode = ?current,
                "listening socket was replaced, leaving it in place"
            );
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed listening socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove listening socket");
            }
        }
    }
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        self.remove();
    }
}
