//! Storage backends.
//!
//! A [`Mounter`] knows how to make a volume's local data directory reflect
//! its backing storage. [`BackendRegistry`] maps backend types to mounters.

mod local;
mod nfs;
mod smb;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use keel_common::{KeelError, KeelResult};

use crate::mount::{MountOutcome, MountRequest, MountUtility};
use crate::volume::{BackendConfig, BackendType};

pub use local::LocalMounter;
pub use nfs::NfsMounter;
pub use smb::SmbMounter;

/// Backend-specific attach/detach strategy.
#[async_trait]
pub trait Mounter: Send + Sync + fmt::Debug {
    /// Backend this mounter serves.
    fn backend(&self) -> BackendType;

    /// Whether Create attaches immediately instead of on first Mount.
    fn attach_on_create(&self) -> bool;

    /// Make `target` reflect the configured storage. Attaching an attached
    /// target succeeds.
    async fn attach(&self, target: &Path, config: &BackendConfig) -> KeelResult<()>;

    /// Detach `target`. Detaching a detached or missing target succeeds.
    async fn detach(&self, target: &Path) -> KeelResult<()>;

    /// Whether storage is currently attached at `target`.
    async fn is_attached(&self, target: &Path) -> KeelResult<bool>;
}

/// Maps backend types to their mounters.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    mounters: HashMap<BackendType, Arc<dyn Mounter>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The production set: local and NFS, plus SMB when enabled.
    #[must_use]
    pub fn standard(utility: Arc<dyn MountUtility>, enable_smb: bool) -> Self {
        let registry = Self::new()
            .with_mounter(Arc::new(LocalMounter::new()))
            .with_mounter(Arc::new(NfsMounter::new(Arc::clone(&utility))));
        if enable_smb {
            registry.with_mounter(Arc::new(SmbMounter::new(utility)))
        } else {
            registry
        }
    }

    /// Register a mounter, replacing any previous one for its backend.
    #[must_use]
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounters.insert(mounter.backend(), mounter);
        self
    }

    /// Mounter for `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::UnsupportedBackend`] if none is registered.
    pub fn resolve(&self, backend: BackendType) -> KeelResult<Arc<dyn Mounter>> {
        self.mounters
            .get(&backend)
            .cloned()
            .ok_or_else(|| KeelError::UnsupportedBackend {
                backend: backend.to_string(),
            })
    }

    /// Registered backends, in display order.
    #[must_use]
    pub fn supported(&self) -> Vec<BackendType> {
        BackendType::ALL
            .into_iter()
            .filter(|backend| self.mounters.contains_key(backend))
            .collect()
    }
}

fn wrong_config(target: &Path, expected: BackendType, config: &BackendConfig) -> KeelError {
    KeelError::MountFailure {
        target: target.to_path_buf(),
        reason: format!(
            "{} configuration given to the {expected} mounter",
            config.backend_type()
        ),
    }
}

/// Require `target` to be a directory without stat-ing it. A dead hard mount
/// on the target blocks `stat`, so the entry is looked up in its parent.
async fn ensure_target(target: &Path) -> KeelResult<()> {
    let missing = |reason: &str| KeelError::MountFailure {
        target: target.to_path_buf(),
        reason: reason.to_string(),
    };
    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Err(missing("target has no parent directory"));
    };

    let mut entries = tokio::fs::read_dir(parent)
        .await
        .map_err(|_| missing("target directory does not exist"))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() == name {
            return if entry.file_type().await?.is_dir() {
                Ok(())
            } else {
                Err(missing("target is not a directory"))
            };
        }
    }
    Err(missing("target directory does not exist"))
}

/// Shared attach path of the network backends.
async fn attach_remote(utility: &dyn MountUtility, request: MountRequest) -> KeelResult<()> {
    let target = request.target.clone();
    ensure_target(&target).await?;

    match utility.is_mounted(&target).await {
        Ok(true) => {
            tracing::debug!(target = %target.display(), "Already mounted");
            return Ok(());
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(target = %target.display(), error = %e, "Mount check failed");
        }
    }

    // A dead server can leave a stale handle that the mount table no longer lists.
    let outcome = utility.unmount(&target).await;
    if !outcome.is_detached() {
        tracing::warn!(target = %target.display(), reason = %outcome.reason(), "Stale mount not cleared");
    }

    match utility.mount(&request).await {
        MountOutcome::Mounted => {
            tracing::info!(
                fstype = %request.fstype,
                source = %request.source,
                target = %target.display(),
                "Mounted"
            );
            Ok(())
        }
        MountOutcome::Failed { reason } => Err(KeelError::MountFailure { target, reason }),
        MountOutcome::TimedOut => Err(KeelError::MountFailure {
            target,
            reason: "mount timed out".to_string(),
        }),
    }
}

/// Shared detach path of the network backends.
async fn detach_remote(utility: &dyn MountUtility, target: &Path) -> KeelResult<()> {
    let outcome = utility.unmount(target).await;
    if outcome.is_detached() {
        tracing::debug!(target = %target.display(), ?outcome, "Detached");
        Ok(())
    } else {
        Err(KeelError::UnmountFailure {
            target: target.to_path_buf(),
            reason: outcome.reason(),
        })
    }
}
