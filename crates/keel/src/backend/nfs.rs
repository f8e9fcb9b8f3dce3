//! NFS backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use keel_common::KeelResult;

use super::{Mounter, attach_remote, detach_remote, wrong_config};
use crate::mount::{MountRequest, MountUtility};
use crate::volume::{BackendConfig, BackendType, NfsConfig};

/// Mounts NFS exports with the host mount utility.
#[derive(Debug, Clone)]
pub struct NfsMounter {
    utility: Arc<dyn MountUtility>,
}

impl NfsMounter {
    /// Create an NFS mounter.
    #[must_use]
    pub fn new(utility: Arc<dyn MountUtility>) -> Self {
        Self { utility }
    }

    fn request(target: &Path, config: &NfsConfig) -> MountRequest {
        MountRequest::new("nfs", config.source(), target, config.mount_options())
    }
}

#[async_trait]
impl Mounter for NfsMounter {
    fn backend(&self) -> BackendType {
        BackendType::Nfs
    }

    fn attach_on_create(&self) -> bool {
        true
    }

    async fn attach(&self, target: &Path, config: &BackendConfig) -> KeelResult<()> {
        let BackendConfig::Nfs(config) = config else {
            return Err(wrong_config(target, BackendType::Nfs, config));
        };
        attach_remote(self.utility.as_ref(), Self::request(target, config)).await
    }

    async fn detach(&self, target: &Path) -> KeelResult<()> {
        detach_remote(self.utility.as_ref(), target).await
    }

    async fn is_attached(&self, target: &Path) -> KeelResult<bool> {
        self.utility.is_mounted(target).await
    }
}
