//! Local directory backend.

use std::path::Path;

use async_trait::async_trait;
use keel_common::KeelResult;

use super::{Mounter, ensure_target, wrong_config};
use crate::volume::{BackendConfig, BackendType};

/// Serves the volume data directory as is. Nothing is ever mounted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMounter;

impl LocalMounter {
    /// Create a local mounter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mounter for LocalMounter {
    fn backend(&self) -> BackendType {
        BackendType::Local
    }

    fn attach_on_create(&self) -> bool {
        false
    }

    async fn attach(&self, target: &Path, config: &BackendConfig) -> KeelResult<()> {
        if !matches!(config, BackendConfig::Local(_)) {
            return Err(wrong_config(target, BackendType::Local, config));
        }
        ensure_target(target).await
    }

    async fn detach(&self, _target: &Path) -> KeelResult<()> {
        Ok(())
    }

    async fn is_attached(&self, _target: &Path) -> KeelResult<bool> {
        Ok(false)
    }
}
