//! In-memory registry.

use async_trait::async_trait;
use keel_common::{KeelError, KeelResult, VolumeName};
use parking_lot::Mutex;

use super::Registry;
use crate::volume::Volume;

/// Registry held in process memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    volumes: Mutex<Vec<Volume>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn find_by_name(&self, name: &VolumeName) -> KeelResult<Option<Volume>> {
        Ok(self
            .volumes
            .lock()
            .iter()
            .find(|volume| &volume.name == name)
            .cloned())
    }

    async fn insert(&self, volume: &Volume) -> KeelResult<()> {
        let mut volumes = self.volumes.lock();
        if volumes.iter().any(|existing| existing.name == volume.name) {
            return Err(KeelError::Conflict {
                name: volume.name.to_string(),
            });
        }
        volumes.push(volume.clone());
        Ok(())
    }

    async fn delete(&self, name: &VolumeName) -> KeelResult<()> {
        let mut volumes = self.volumes.lock();
        let index = volumes
            .iter()
            .position(|volume| &volume.name == name)
            .ok_or_else(|| KeelError::NotFound {
                name: name.to_string(),
            })?;
        volumes.remove(index);
        Ok(())
    }

    async fn list(&self) -> KeelResult<Vec<Volume>> {
        let mut volumes = self.volumes.lock().clone();
        volumes.sort_by_key(|volume| volume.created_at);
        Ok(volumes)
    }
}
