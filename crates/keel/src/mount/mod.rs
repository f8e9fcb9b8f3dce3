//! Host mount capability.
//!
//! Mounters never touch the OS directly; they go through [`MountUtility`].
//! Results are reported as structured outcomes so callers can tell an
//! idempotent "nothing to do" apart from a real failure without inspecting
//! message text.

pub mod mountinfo;
mod system;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_common::KeelResult;

pub use system::SystemMount;

/// Option keys whose values are secrets and must not be logged.
const SECRET_OPTIONS: &[&str] = &["password", "pass"];

/// A request to attach a remote filesystem at a target directory.
#[derive(Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Filesystem type (`nfs`, `cifs`).
    pub fstype: String,
    /// Mount source (`server:/export`, `//server/share`).
    pub source: String,
    /// Directory to mount on.
    pub target: PathBuf,
    /// Options joined with commas for `-o`.
    pub options: Vec<String>,
}

impl MountRequest {
    /// Create a new mount request.
    pub fn new(
        fstype: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<PathBuf>,
        options: Vec<String>,
    ) -> Self {
        Self {
            fstype: fstype.into(),
            source: source.into(),
            target: target.into(),
            options,
        }
    }

    /// Arguments for the `mount` binary.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.fstype.clone()];
        if !self.options.is_empty() {
            args.push("-o".to_string());
            args.push(self.options.join(","));
        }
        args.push(self.source.clone());
        args.push(self.target.to_string_lossy().into_owned());
        args
    }

    /// Options with secret values masked.
    #[must_use]
    pub fn redacted_options(&self) -> String {
        self.options
            .iter()
            .map(|option| match option.split_once('=') {
                Some((key, _)) if SECRET_OPTIONS.contains(&key) => format!("{key}=***"),
                _ => option.clone(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Debug for MountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountRequest")
            .field("fstype", &self.fstype)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("options", &self.redacted_options())
            .finish()
    }
}

/// Result of a mount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// The filesystem is mounted at the target.
    Mounted,
    /// The mount utility reported an error.
    Failed {
        /// Diagnostic from the utility.
        reason: String,
    },
    /// The mount utility did not finish in time and was killed.
    TimedOut,
}

/// Result of an unmount attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// A mount was removed.
    Unmounted,
    /// The target is not a mount point (`EINVAL`).
    NotMounted,
    /// The target does not exist (`ENOENT`).
    Missing,
    /// The mount is busy (`EBUSY`).
    Busy,
    /// Any other failure.
    Failed {
        /// Diagnostic from the OS.
        reason: String,
    },
    /// The unmount did not finish in time.
    TimedOut,
}

impl UnmountOutcome {
    /// Whether the target is detached afterwards.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        matches!(self, Self::Unmounted | Self::NotMounted | Self::Missing)
    }

    /// Failure description for a non-detached outcome.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Unmounted => "unmounted".to_string(),
            Self::NotMounted => "not mounted".to_string(),
            Self::Missing => "no such file or directory".to_string(),
            Self::Busy => "device or resource busy".to_string(),
            Self::Failed { reason } => reason.clone(),
            Self::TimedOut => "operation timed out".to_string(),
        }
    }
}

/// OS mount capability consumed by the mounters.
#[async_trait]
pub trait MountUtility: Send + Sync + fmt::Debug {
    /// Attach a filesystem.
    async fn mount(&self, request: &MountRequest) -> MountOutcome;

    /// Detach whatever is mounted at `target`, lazily and forcibly.
    async fn unmount(&self, target: &Path) -> UnmountOutcome;

    /// Whether `target` is currently a mount point.
    async fn is_mounted(&self, target: &Path) -> KeelResult<bool>;

    /// Every mount point strictly below `root`, expressed under `root`.
    async fn mounts_under(&self, root: &Path) -> KeelResult<Vec<PathBuf>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MountRequest {
        MountRequest::new(
            "cifs",
            "//nas/media",
            "/var/lib/keel/volumes/media/_data",
            vec![
                "vers=3.0".into(),
                "username=alice".into(),
                "password=hunter2".into(),
            ],
        )
    }

    #[test]
    fn mount_args() {
        assert_eq!(
            request().args(),
            vec![
                "-t",
                "cifs",
                "-o",
                "vers=3.0,username=alice,password=hunter2",
                "//nas/media",
                "/var/lib/keel/volumes/media/_data",
            ]
        );
    }

    #[test]
    fn secrets_are_redacted() {
        let request = request();
        assert_eq!(
            request.redacted_options(),
            "vers=3.0,username=alice,password=***"
        );
        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn detached_outcomes() {
        assert!(UnmountOutcome::Unmounted.is_detached());
        assert!(UnmountOutcome::NotMounted.is_detached());
        assert!(UnmountOutcome::Missing.is_detached());
        assert!(!UnmountOutcome::Busy.is_detached());
        assert!(!UnmountOutcome::TimedOut.is_detached());
        assert!(
            !UnmountOutcome::Failed {
                reason: "EPERM".into()
            }
            .is_detached()
        );
    }
}
