//! Volume lifecycle controller.
//!
//! Every lifecycle transition goes through [`LifecycleController`]. It keeps
//! the registry consistent with what is attached on the host:
//!
//! - Create provisions the directory, attaches when the backend asks for it,
//!   then inserts the record. A failure rolls back what the call created.
//! - Mount attaches on demand and records the caller as a user.
//! - Unmount detaches once the last user releases the volume.
//! - Remove detaches, deletes the record, then removes the directory tree.
//!
//! Mutating operations on one name are serialized; reads take no lock.
//! [`LifecycleController::reconcile`] converges host leftovers at startup.

mod locks;
mod reconcile;
mod users;


use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use keel_common::{KeelError, KeelPaths, KeelResult, VolumeName};
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendRegistry, Mounter};
use crate::registry::Registry;
use crate::volume::{BackendConfig, Volume};

pub use locks::{NameGuard, NameLocks};
pub use reconcile::ReconcileReport;
pub use users::{ActiveUsers, Release};

/// Plugin capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the driver declares a scope.
    pub scope: bool,
}

/// Protocols implemented by the plugin.
pub const IMPLEMENTS: &[&str] = &["VolumeDriver"];

/// Orchestrates volume lifecycle transitions.
#[derive(Debug)]
pub struct LifecycleController {
    registry: Arc<dyn Registry>,
    backends: BackendRegistry,
    paths: KeelPaths,
    locks: NameLocks,
    users: ActiveUsers,
}

impl LifecycleController {
    /// Create a controller over the given registry, backends, and paths.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, backends: BackendRegistry, paths: KeelPaths) -> Self {
        Self {
            registry,
            backends,
            paths,
            locks: NameLocks::new(),
            users: ActiveUsers::new(),
        }
    }

    /// Paths the controller provisions under.
    #[must_use]
    pub const fn paths(&self) -> &KeelPaths {
        &self.paths
    }

    /// Number of mounter IDs currently using `name`.
    #[must_use]
    pub fn active_users(&self, name: &VolumeName) -> usize {
        self.users.count(name)
    }

    /// Create a volume.
    ///
    /// # Errors
    ///
    /// - [`KeelError::InvalidVolumeName`] if `name` is not a slug
    /// - [`KeelError::Conflict`] if the volume exists
    /// - [`KeelError::UnsupportedBackend`] if the backend is disabled
    /// - [`KeelError::MountFailure`] if attaching at creation fails
    #[instrument(skip(self, config), fields(backend = %config.backend_type()))]
    pub async fn create(&self, name: &str, config: BackendConfig) -> KeelResult<Volume> {
        let name = VolumeName::new(name)?;
        let _guard = self.locks.lock(&name).await;

        if self.registry.find_by_name(&name).await?.is_some() {
            return Err(KeelError::Conflict {
                name: name.to_string(),
            });
        }
        let mounter = self.backends.resolve(config.backend_type())?;

        let data = self.paths.volume_data(&name);
        let created_dir = !tokio::fs::try_exists(self.paths.volume_dir(&name)).await?;

        if let Err(e) = tokio::fs::create_dir_all(&data).await {
            self.roll_back(mounter.as_ref(), &name, created_dir).await;
            return Err(e.into());
        }

        if mounter.attach_on_create() {
            if let Err(e) = mounter.attach(&data, &config).await {
                warn!(name = %name, error = %e, "Attach failed, rolling back");
                self.roll_back(mounter.as_ref(), &name, created_dir).await;
                return Err(e);
            }
        }

        let volume = Volume {
            host_path: self.paths.host_path(&name),
            name,
            config,
            created_at: Utc::now(),
        };

        if let Err(e) = self.registry.insert(&volume).await {
            warn!(name = %volume.name, error = %e, "Insert failed, rolling back");
            self.roll_back(mounter.as_ref(), &volume.name, created_dir).await;
            return Err(e);
        }

        info!(
            name = %volume.name,
            backend = %volume.backend_type(),
            path = %volume.host_path.display(),
            "Volume created"
        );
        Ok(volume)
    }

    /// Attach a volume for a container and return its host path.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotFound`] for an unknown volume, or
    /// [`KeelError::MountFailure`] if attaching fails.
    #[instrument(skip(self))]
    pub async fn mount(&self, name: &str, mounter_id: &str) -> KeelResult<PathBuf> {
        let name = existing_name(name)?;
        let _guard = self.locks.lock(&name).await;

        let volume = self.require(&name).await?;
        let mounter = self.backends.resolve(volume.backend_type())?;
        mounter
            .attach(&self.paths.volume_data(&name), &volume.config)
            .await?;

        let users = self.users.acquire(&name, mounter_id);
        info!(name = %name, users, path = %volume.host_path.display(), "Volume mounted");
        Ok(volume.host_path)
    }

    /// Release a volume for a container. Detaches when no user remains.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotFound`] for an unknown volume, or
    /// [`KeelError::UnmountFailure`] if detaching fails.
    #[instrument(skip(self))]
    pub async fn unmount(&self, name: &str, mounter_id: &str) -> KeelResult<()> {
        let name = existing_name(name)?;
        let _guard = self.locks.lock(&name).await;

        let volume = self.require(&name).await?;

        let release = self.users.release(&name, mounter_id);
        if !release.should_detach() {
            debug!(name = %name, ?release, "Volume still in use");
            return Ok(());
        }

        let mounter = self.backends.resolve(volume.backend_type())?;
        mounter.detach(&self.paths.volume_data(&name)).await?;

        info!(name = %name, "Volume unmounted");
        Ok(())
    }

    /// Host path of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotFound`] for an unknown volume.
    pub async fn path(&self, name: &str) -> KeelResult<PathBuf> {
        let name = existing_name(name)?;
        Ok(self.require(&name).await?.host_path)
    }

    /// Look up a volume.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotFound`] for an unknown volume.
    pub async fn get(&self, name: &str) -> KeelResult<Volume> {
        let name = existing_name(name)?;
        self.require(&name).await
    }

    /// All volumes, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn list(&self) -> KeelResult<Vec<Volume>> {
        self.registry.list().await
    }

    /// Delete a volume and its directory tree.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotFound`] for an unknown volume, or
    /// [`KeelError::UnmountFailure`] if detaching fails. Directory cleanup
    /// failures are logged, not returned.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> KeelResult<()> {
        let name = existing_name(name)?;
        let _guard = self.locks.lock(&name).await;

        let volume = self.require(&name).await?;
        let mounter = self.backends.resolve(volume.backend_type())?;
        let data = self.paths.volume_data(&name);

        mounter.detach(&data).await?;
        self.registry.delete(&name).await?;
        self.users.forget(&name);

        self.remove_tree(mounter.as_ref(), &name).await;

        info!(name = %name, "Volume removed");
        Ok(())
    }

    /// Static plugin capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities { scope: true }
    }

    /// Protocols this plugin implements.
    #[must_use]
    pub const fn activate(&self) -> &'static [&'static str] {
        IMPLEMENTS
    }

    async fn require(&self, name: &VolumeName) -> KeelResult<Volume> {
        self.registry
            .find_by_name(name)
            .await?
            .ok_or_else(|| KeelError::NotFound {
                name: name.to_string(),
            })
    }

    /// Undo a failed create: detach, then remove the tree if this call made it.
    async fn roll_back(&self, mounter: &dyn Mounter, name: &VolumeName, created_dir: bool) {
        if mounter.attach_on_create() {
            if let Err(e) = mounter.detach(&self.paths.volume_data(name)).await {
                warn!(name = %name, error = %e, "Rollback detach failed");
            }
        }
        if created_dir {
            self.remove_tree(mounter, name).await;
        }
    }

    /// Best-effort removal of a volume directory. Never removes a tree that
    /// still has storage mounted inside it.
    async fn remove_tree(&self, mounter: &dyn Mounter, name: &VolumeName) {
        let dir = self.paths.volume_dir(name);
        match mounter.is_attached(&self.paths.volume_data(name)).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(dir = %dir.display(), "Storage still attached, leaving directory in place");
                return;
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot verify mount state, leaving directory in place");
                return;
            }
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Directory removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove directory"),
        }
    }
}

/// Parse the name of a volume that must already exist. A name that could
/// never have been created is simply not found.
fn existing_name(name: &str) -> KeelResult<VolumeName> {
    VolumeName::new(name).map_err(|_| KeelError::NotFound {
        name: name.to_string(),
    })
}
