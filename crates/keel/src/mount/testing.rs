//! In-memory mount utility for tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keel_common::KeelResult;
use parking_lot::Mutex;

use super::{MountOutcome, MountRequest, MountUtility, UnmountOutcome};

/// Records every call and tracks a fake mount table.
///
/// Mounts succeed and unmounts of mounted targets report
/// [`UnmountOutcome::Unmounted`] unless a failure has been scripted.
#[derive(Debug, Default)]
pub struct RecordingMount {
    state: Mutex<RecordingState>,
}

#[derive(Debug, Default)]
struct RecordingState {
    mounted: HashSet<PathBuf>,
    mounts: Vec<MountRequest>,
    unmounts: Vec<PathBuf>,
    mount_failure: Option<String>,
    unmount_failure: Option<UnmountOutcome>,
}

impl RecordingMount {
    /// Create a utility with an empty mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following mount fail with `reason`.
    pub fn fail_mounts(&self, reason: impl Into<String>) {
        self.state.lock().mount_failure = Some(reason.into());
    }

    /// Make every following unmount of a mounted target return `outcome`.
    pub fn fail_unmounts(&self, outcome: UnmountOutcome) {
        self.state.lock().unmount_failure = Some(outcome);
    }

    /// Clear scripted failures.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.mount_failure = None;
        state.unmount_failure = None;
    }

    /// Pretend something is already mounted at `target`.
    pub fn mark_mounted(&self, target: impl Into<PathBuf>) {
        self.state.lock().mounted.insert(target.into());
    }

    /// Whether the fake table has `target` mounted.
    #[must_use]
    pub fn contains(&self, target: &Path) -> bool {
        self.state.lock().mounted.contains(target)
    }

    /// Every mount request received, in order.
    #[must_use]
    pub fn mounts(&self) -> Vec<MountRequest> {
        self.state.lock().mounts.clone()
    }

    /// Every unmount target received, in order.
    #[must_use]
    pub fn unmounts(&self) -> Vec<PathBuf> {
        self.state.lock().unmounts.clone()
    }
}

#[async_trait]
impl MountUtility for RecordingMount {
    async fn mount(&self, request: &MountRequest) -> MountOutcome {
        let mut state = self.state.lock();
        state.mounts.push(request.clone());
        if let Some(reason) = &state.mount_failure {
            return MountOutcome::Failed {
                reason: reason.clone(),
            };
        }
        state.mounted.insert(request.target.clone());
        MountOutcome::Mounted
    }

    async fn unmount(&self, target: &Path) -> UnmountOutcome {
        let mut state = self.state.lock();
        state.unmounts.push(target.to_path_buf());
        if !state.mounted.contains(target) {
            return UnmountOutcome::NotMounted;
        }
        if let Some(outcome) = &state.unmount_failure {
            return outcome.clone();
        }
        state.mounted.remove(target);
        UnmountOutcome::Unmounted
    }

    async fn is_mounted(&self, target: &Path) -> KeelResult<bool> {
        Ok(self.contains(target))
    }

    async fn mounts_under(&self, root: &Path) -> KeelResult<Vec<PathBuf>> {
        let mut mounts: Vec<PathBuf> = self
            .state
            .lock()
            .mounted
            .iter()
            .filter(|target| target.starts_with(root) && target.as_path() != root)
            .cloned()
            .collect();
        mounts.sort();
        Ok(mounts)
    }
}
