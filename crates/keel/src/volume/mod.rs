//! Volume model.
//!
//! A volume is a named, persistent identity bound to one storage backend.
//! Its backend type and configuration are fixed when it is created.

mod schema;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use keel_common::VolumeName;

pub use schema::{
    BackendConfig, BackendType, LocalConfig, NfsConfig, NfsVersion, SmbConfig, SmbVersion,
};

/// Timestamp format used on the plugin protocol.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A registered volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume name.
    pub name: VolumeName,
    /// Where the volume contents are presented to the container runtime.
    pub host_path: PathBuf,
    /// Backend configuration.
    pub config: BackendConfig,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Backend serving this volume.
    #[must_use]
    pub const fn backend_type(&self) -> BackendType {
        self.config.backend_type()
    }

    /// Creation time in plugin protocol form.
    #[must_use]
    pub fn created_at_string(&self) -> String {
        self.created_at.format(CREATED_AT_FORMAT).to_string()
    }
}
