//! Volume registry.
//!
//! The registry is the only durable state: a mapping from volume name to
//! volume record. Records are inserted and deleted, never updated.

mod memory;
pub mod migrations;
mod sqlite;

#[cfg(test)]
mod tests;

use std::fmt;

use async_trait::async_trait;
use keel_common::{KeelResult, VolumeName};

use crate::volume::Volume;

pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;

/// Durable store of volume records.
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    /// Look up a volume. Absence is not an error.
    async fn find_by_name(&self, name: &VolumeName) -> KeelResult<Option<Volume>>;

    /// Insert a new volume; `Conflict` if the name is taken.
    async fn insert(&self, volume: &Volume) -> KeelResult<()>;

    /// Delete a volume; `NotFound` if the name is unknown.
    async fn delete(&self, name: &VolumeName) -> KeelResult<()>;

    /// All volumes, oldest first, ties in insertion order.
    async fn list(&self) -> KeelResult<Vec<Volume>>;
}
