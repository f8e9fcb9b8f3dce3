//! SMB/CIFS backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use keel_common::KeelResult;

use super::{Mounter, attach_remote, detach_remote, wrong_config};
use crate::mount::{MountRequest, MountUtility};
use crate::volume::{BackendConfig, BackendType};

/// Mounts SMB shares with the host mount utility. Attached on first Mount.
#[derive(Debug, Clone)]
pub struct SmbMounter {
    utility: Arc<dyn MountUtility>,
}

impl SmbMounter {
    /// Create an SMB mounter.
    #[must_use]
    pub fn new(utility: Arc<dyn MountUtility>) -> Self {
        Self { utility }
    }
}

#[async_trait]
impl Mounter for SmbMounter {
    fn backend(&self) -> BackendType {
        BackendType::Smb
    }

    fn attach_on_create(&self) -> bool {
        false
    }

    async fn attach(&self, target: &Path, config: &BackendConfig) -> KeelResult<()> {
        let BackendConfig::Smb(config) = config else {
            return Err(wrong_config(target, BackendType::Smb, config));
        };
        let request = MountRequest::new("cifs", config.source(), target, config.mount_options());
        attach_remote(self.utility.as_ref(), request).await
    }

    async fn detach(&self, target: &Path) -> KeelResult<()> {
        detach_remote(self.utility.as_ref(), target).await
    }

    async fn is_attached(&self, target: &Path) -> KeelResult<bool> {
        self.utility.is_mounted(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::testing::RecordingMount;
    use crate::volume::SmbConfig;

    #[tokio::test]
    async fn guest_mount() {
        let dir = tempfile::tempdir().unwrap();
        let utility = Arc::new(RecordingMount::new());
        let mounter = SmbMounter::new(utility.clone());
        let config = BackendConfig::Smb(SmbConfig {
            server: "nas".into(),
            share: "public".into(),
            username: None,
            password: None,
            domain: None,
            vers: None,
            port: None,
            read_only: Some(true),
        });

        mounter.attach(dir.path(), &config).await.unwrap();

        let mounts = utility.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].fstype, "cifs");
        assert_eq!(mounts[0].source, "//nas/public");
        assert_eq!(mounts[0].options, vec!["vers=3.0", "port=445", "guest", "ro"]);
    }
}
