//! Daemon configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keel_common::paths::KEEL_ROOT;
use keel_common::{KeelError, KeelPaths, KeelResult};
use serde::{Deserialize, Serialize};

/// Default plugin driver name; the socket is `<plugin dir>/<driver>.sock`.
pub const DEFAULT_DRIVER: &str = "keel";

/// Default admin API listen address.
pub const DEFAULT_ADMIN_LISTEN: &str = "0.0.0.0:8080";

/// Default bound on a single attach or detach, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Daemon configuration options.
///
/// Loaded from an optional TOML file; every key is optional and unknown keys
/// are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// State root (default: /var/lib/keel).
    pub root: PathBuf,
    /// Registry database; `<root>/keel.db` when unset.
    pub database: Option<PathBuf>,
    /// Volume root as seen by the daemon; `<root>/volumes` when unset.
    pub volumes: Option<PathBuf>,
    /// Volume root as seen by the container runtime; the local root when unset.
    pub host_volumes: Option<PathBuf>,
    /// Plugin socket path.
    pub socket: PathBuf,
    /// Serve the admin API.
    pub admin_enabled: bool,
    /// Admin API listen address.
    pub admin_listen: SocketAddr,
    /// Bound on a single attach or detach (seconds).
    pub timeout: u64,
    /// Register the SMB backend.
    pub enable_smb: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: KEEL_ROOT.clone(),
            database: None,
            volumes: None,
            host_volumes: None,
            socket: KeelPaths::plugin_socket(DEFAULT_DRIVER),
            admin_enabled: true,
            admin_listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            timeout: DEFAULT_TIMEOUT_SECS,
            enable_smb: false,
        }
    }
}

impl DaemonConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KeelError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        toml::from_str(&contents).map_err(|e| KeelError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Config`] on invalid TOML or unknown keys.
    pub fn from_toml(contents: &str) -> KeelResult<Self> {
        toml::from_str(contents).map_err(|e| KeelError::Config {
            message: e.to_string(),
        })
    }

    /// Set the state root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the host-visible volume root.
    #[must_use]
    pub fn with_host_volumes(mut self, host_volumes: impl Into<PathBuf>) -> Self {
        self.host_volumes = Some(host_volumes.into());
        self
    }

    /// Set the operation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable the SMB backend.
    #[must_use]
    pub const fn with_smb(mut self) -> Self {
        self.enable_smb = true;
        self
    }

    /// Resolved volume paths.
    #[must_use]
    pub fn paths(&self) -> KeelPaths {
        let mut paths = KeelPaths::with_root(&self.root);
        if let Some(volumes) = &self.volumes {
            paths = paths.with_volumes(volumes).with_host_volumes(volumes);
        }
        if let Some(host_volumes) = &self.host_volumes {
            paths = paths.with_host_volumes(host_volumes);
        }
        paths
    }

    /// Resolved database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.paths().database())
    }

    /// Operation timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Config`] listing every problem.
    pub fn validate(&self) -> KeelResult<()> {
        let mut problems = Vec::new();

        let paths = self.paths();
        let absolute = [
            ("root", Some(&self.root)),
            ("database", self.database.as_ref()),
            ("volumes", Some(&paths.volumes)),
            ("host_volumes", Some(&paths.host_volumes)),
            ("socket", Some(&self.socket)),
        ];
        for (key, path) in absolute {
            if let Some(path) = path {
                if !path.is_absolute() {
                    problems.push(format!("{key} must be an absolute path, got '{}'", path.display()));
                }
            }
        }
        if self.timeout == 0 {
            problems.push("timeout must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(KeelError::Config {
                message: problems.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket, PathBuf::from("/run/docker/plugins/keel.sock"));
        assert_eq!(config.admin_listen.to_string(), DEFAULT_ADMIN_LISTEN);
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert!(config.admin_enabled);
        assert!(!config.enable_smb);
    }

    #[test]
    fn derived_paths() {
        let config = DaemonConfig::default()
            .with_root("/srv/keel")
            .with_host_volumes("/host/volumes");
        let paths = config.paths();
        assert_eq!(paths.volumes, PathBuf::from("/srv/keel/volumes"));
        assert_eq!(paths.host_volumes, PathBuf::from("/host/volumes"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/keel/keel.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml() {
        let config = DaemonConfig::from_toml(
            r#"
            root = "/data/keel"
            volumes = "/data/volumes"
            admin_listen = "127.0.0.1:9090"
            timeout = 5
            enable_smb = true
            "#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/data/keel"));
        assert_eq!(config.paths().volumes, PathBuf::from("/data/volumes"));
        assert_eq!(config.paths().host_volumes, PathBuf::from("/data/volumes"));
        assert_eq!(config.admin_listen.port(), 9090);
        assert_eq!(config.timeout, 5);
        assert!(config.enable_smb);
    }

    #[test]
    fn builders_override_defaults() {
        let config = DaemonConfig::default().with_smb().with_timeout(5);
        assert!(config.enable_smb);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DaemonConfig::from_toml("rootless = true").unwrap_err();
        assert!(matches!(err, KeelError::Config { .. }));
    }

    #[test]
    fn validation() {
        let err = DaemonConfig::default()
            .with_root("relative")
            .with_timeout(0)
            .validate()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("root must be an absolute path"));
        assert!(message.contains("timeout must be greater than zero"));
    }
}
