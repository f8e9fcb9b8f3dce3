//! Mount utility backed by the host.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use keel_common::KeelResult;
use rustix::io::Errno;
use rustix::mount::{UnmountFlags, unmount};
use tokio::process::Command;
use tokio::time::timeout;

use super::mountinfo::{self, MOUNTINFO_PATH};
use super::{MountOutcome, MountRequest, MountUtility, UnmountOutcome};

/// Attaches through the host `mount` binary and detaches with `umount2`.
#[derive(Debug, Clone)]
pub struct SystemMount {
    binary: PathBuf,
    mountinfo: PathBuf,
    timeout: Duration,
}

impl SystemMount {
    /// Create a mount utility bounding every operation by `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("mount"),
            mountinfo: PathBuf::from(MOUNTINFO_PATH),
            timeout,
        }
    }

    /// Use a different `mount` binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Read the mount table from a different file.
    #[must_use]
    pub fn with_mountinfo(mut self, mountinfo: impl Into<PathBuf>) -> Self {
        self.mountinfo = mountinfo.into();
        self
    }
}

#[async_trait]
impl MountUtility for SystemMount {
    async fn mount(&self, request: &MountRequest) -> MountOutcome {
        tracing::debug!(
            fstype = %request.fstype,
            source = %request.source,
            target = %request.target.display(),
            options = %request.redacted_options(),
            "Running mount"
        );

        let mut command = Command::new(&self.binary);
        command
            .args(request.args())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match timeout(self.timeout, command.output()).await {
            Err(_) => MountOutcome::TimedOut,
            Ok(Err(e)) => MountOutcome::Failed {
                reason: format!("failed to run {}: {e}", self.binary.display()),
            },
            Ok(Ok(output)) if output.status.success() => MountOutcome::Mounted,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                MountOutcome::Failed {
                    reason: if stderr.is_empty() {
                        format!("mount exited with {}", output.status)
                    } else {
                        stderr
                    },
                }
            }
        }
    }

    async fn unmount(&self, target: &Path) -> UnmountOutcome {
        tracing::debug!(target = %target.display(), "Unmounting");

        let path = target.to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            unmount(path.as_path(), UnmountFlags::DETACH | UnmountFlags::FORCE)
        });

        match timeout(self.timeout, task).await {
            Err(_) => UnmountOutcome::TimedOut,
            Ok(Err(join)) => UnmountOutcome::Failed {
                reason: join.to_string(),
            },
            Ok(Ok(Ok(()))) => UnmountOutcome::Unmounted,
            Ok(Ok(Err(errno))) => classify(errno),
        }
    }

    async fn is_mounted(&self, target: &Path) -> KeelResult<bool> {
        let contents = tokio::fs::read_to_string(&self.mountinfo).await?;
        let target = self.resolve(target).await;

        Ok(mountinfo::parse(&contents)
            .iter()
            .any(|entry| entry.mount_point == target))
    }

    async fn mounts_under(&self, root: &Path) -> KeelResult<Vec<PathBuf>> {
        let contents = tokio::fs::read_to_string(&self.mountinfo).await?;
        let canonical = self.canonicalize(root).await;

        Ok(mountinfo::parse(&contents)
            .into_iter()
            .filter_map(|entry| {
                let relative = entry.mount_point.strip_prefix(&canonical).ok()?;
                (!relative.as_os_str().is_empty()).then(|| root.join(relative))
            })
            .collect())
    }
}

impl SystemMount {
    /// Canonical form of `target`. Only the parent is resolved, so a hung
    /// mount on the target itself is never touched.
    async fn resolve(&self, target: &Path) -> PathBuf {
        match (target.parent(), target.file_name()) {
            (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                self.canonicalize(parent).await.join(name)
            }
            _ => target.to_path_buf(),
        }
    }

    async fn canonicalize(&self, path: &Path) -> PathBuf {
        match timeout(self.timeout, tokio::fs::canonicalize(path)).await {
            Ok(Ok(canonical)) => canonical,
            Ok(Err(_)) => path.to_path_buf(),
            Err(_) => {
                tracing::warn!(path = %path.display(), "Timed out resolving path");
                path.to_path_buf()
            }
        }
    }
}

fn classify(errno: Errno) -> UnmountOutcome {
    match errno {
        Errno::INVAL => UnmountOutcome::NotMounted,
        Errno::NOENT => UnmountOutcome::Missing,
        Errno::BUSY => UnmountOutcome::Busy,
        other => UnmountOutcome::Failed {
            reason: other.to_string(),
        },
    }
}
