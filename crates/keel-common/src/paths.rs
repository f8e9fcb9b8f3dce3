//! Standard filesystem paths for Keel.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::name::VolumeName;

/// Default root directory for Keel state.
pub static KEEL_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KEEL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/keel"))
});

/// Directory the container runtime scans for plugin sockets.
pub const PLUGIN_SOCKET_DIR: &str = "/run/docker/plugins";

/// Name of the per-volume directory holding the volume contents.
pub const DATA_DIR: &str = "_data";

/// Standard paths used by the daemon.
///
/// Volumes live under two roots that name the same directory: `volumes` is
/// where this process creates and mounts things, `host_volumes` is how the
/// container runtime sees it. They differ when the daemon itself runs in a
/// container with the host volume directory bind-mounted somewhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeelPaths {
    /// Root state directory (default: /var/lib/keel).
    pub root: PathBuf,
    /// Volume root as seen by this process.
    pub volumes: PathBuf,
    /// Volume root as seen by the container runtime.
    pub host_volumes: PathBuf,
}

impl KeelPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let volumes = root.join("volumes");
        Self {
            host_volumes: volumes.clone(),
            volumes,
            root,
        }
    }

    /// Override the host-visible volume root.
    #[must_use]
    pub fn with_host_volumes(mut self, host_volumes: impl Into<PathBuf>) -> Self {
        self.host_volumes = host_volumes.into();
        self
    }

    /// Override the local volume root.
    #[must_use]
    pub fn with_volumes(mut self, volumes: impl Into<PathBuf>) -> Self {
        self.volumes = volumes.into();
        self
    }

    /// SQLite database holding the volume registry.
    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.root.join("keel.db")
    }

    /// Directory owned by a volume; removed as a whole on volume removal.
    #[must_use]
    pub fn volume_dir(&self, name: &VolumeName) -> PathBuf {
        self.volumes.join(name.as_str())
    }

    /// Directory backing the volume contents, and the mount target.
    #[must_use]
    pub fn volume_data(&self, name: &VolumeName) -> PathBuf {
        self.volume_dir(name).join(DATA_DIR)
    }

    /// Host-visible path reported to the container runtime.
    #[must_use]
    pub fn host_path(&self, name: &VolumeName) -> PathBuf {
        self.host_volumes.join(name.as_str()).join(DATA_DIR)
    }

    /// Plugin socket path for a driver name.
    #[must_use]
    pub fn plugin_socket(driver: &str) -> PathBuf {
        Path::new(PLUGIN_SOCKET_DIR).join(format!("{driver}.sock"))
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.volumes)?;
        Ok(())
    }
}

impl Default for KeelPaths {
    fn default() -> Self {
        Self::with_root(KEEL_ROOT.clone())
    }
}
