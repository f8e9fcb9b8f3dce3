//! Startup reconciliation of host state against the registry.
//!
//! Rollbacks keep directories they did not create, and removal leaves trees
//! with storage still attached. Reconciliation converges what is left:
//!
//! - registered volumes whose backend attaches at create are attached again;
//! - `<volumes>/<name>/_data` mounts with no registry row are detached;
//! - volume directories with no registry row are removed once nothing is
//!   mounted below them.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use keel_common::paths::DATA_DIR;
use keel_common::{KeelResult, VolumeName};
use tracing::{debug, info, instrument, warn};

use super::{LifecycleController, NameGuard};
use crate::mount::MountUtility;
use crate::volume::Volume;

/// Changes made by [`LifecycleController::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Registered volumes whose storage was attached.
    pub attached: Vec<VolumeName>,
    /// Orphaned mount points detached.
    pub detached: Vec<PathBuf>,
    /// Orphaned volume directories removed.
    pub removed: Vec<PathBuf>,
    /// Steps that failed and were left for the next run.
    pub failures: usize,
}

impl LifecycleController {
    /// Bring the host in line with the registry.
    ///
    /// Individual failures are logged and counted, never returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry or the mount table cannot be read.
    #[instrument(skip(self, utility))]
    pub async fn reconcile(&self, utility: &dyn MountUtility) -> KeelResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let volumes = self.registry.list().await?;
        for volume in &volumes {
            self.reattach(volume, &mut report).await?;
        }

        let registered: HashSet<String> = volumes
            .iter()
            .map(|volume| volume.name.to_string())
            .collect();
        self.detach_orphans(utility, &registered, &mut report).await?;
        self.remove_orphans(utility, &registered, &mut report).await?;

        info!(
            attached = report.attached.len(),
            detached = report.detached.len(),
            removed = report.removed.len(),
            failures = report.failures,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn reattach(&self, volume: &Volume, report: &mut ReconcileReport) -> KeelResult<()> {
        let mounter = match self.backends.resolve(volume.backend_type()) {
            Ok(mounter) => mounter,
            Err(e) => {
                warn!(name = %volume.name, error = %e, "Cannot reattach volume");
                report.failures += 1;
                return Ok(());
            }
        };
        if !mounter.attach_on_create() {
            return Ok(());
        }

        let _guard = self.locks.lock(&volume.name).await;
        if self.registry.find_by_name(&volume.name).await?.is_none() {
            return Ok(());
        }
        match mounter
            .attach(&self.paths.volume_data(&volume.name), &volume.config)
            .await
        {
            Ok(()) => report.attached.push(volume.name.clone()),
            Err(e) => {
                warn!(name = %volume.name, error = %e, "Reattach failed");
                report.failures += 1;
            }
        }
        Ok(())
    }

    async fn detach_orphans(
        &self,
        utility: &dyn MountUtility,
        registered: &HashSet<String>,
        report: &mut ReconcileReport,
    ) -> KeelResult<()> {
        for mount_point in utility.mounts_under(&self.paths.volumes).await? {
            let Some(dir_name) = self.data_owner(&mount_point) else {
                debug!(mount_point = %mount_point.display(), "Ignoring foreign mount");
                continue;
            };
            if registered.contains(&dir_name) {
                continue;
            }
            let Some(_guard) = self.lock_orphan(&dir_name).await? else {
                continue;
            };

            let outcome = utility.unmount(&mount_point).await;
            if outcome.is_detached() {
                info!(mount_point = %mount_point.display(), "Detached orphaned mount");
                report.detached.push(mount_point);
            } else {
                warn!(
                    mount_point = %mount_point.display(),
                    reason = %outcome.reason(),
                    "Failed to detach orphaned mount"
                );
                report.failures += 1;
            }
        }
        Ok(())
    }

    async fn remove_orphans(
        &self,
        utility: &dyn MountUtility,
        registered: &HashSet<String>,
        report: &mut ReconcileReport,
    ) -> KeelResult<()> {
        let mut entries = match tokio::fs::read_dir(&self.paths.volumes).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(dir_name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };
            if registered.contains(&dir_name) || !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(_guard) = self.lock_orphan(&dir_name).await? else {
                continue;
            };

            let dir = entry.path();
            if !utility.mounts_under(&dir).await?.is_empty() {
                warn!(dir = %dir.display(), "Storage still attached, leaving orphaned directory");
                report.failures += 1;
                continue;
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    info!(dir = %dir.display(), "Removed orphaned directory");
                    report.removed.push(dir);
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to remove orphaned directory");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Directory name of a `<volumes>/<name>/_data` mount point.
    fn data_owner(&self, mount_point: &Path) -> Option<String> {
        if mount_point.file_name()? != DATA_DIR {
            return None;
        }
        let dir = mount_point.parent()?;
        if dir.parent()? != self.paths.volumes {
            return None;
        }
        dir.file_name()?.to_str().map(ToOwned::to_owned)
    }

    /// Lock an orphan's name against a concurrent create. Returns `None` when
    /// the name was registered in the meantime.
    async fn lock_orphan(&self, dir_name: &str) -> KeelResult<Option<OrphanGuard<'_>>> {
        // Names that are not slugs can never be created.
        let Ok(name) = VolumeName::new(dir_name) else {
            return Ok(Some(OrphanGuard { _guard: None }));
        };
        let guard = self.locks.lock(&name).await;
        if self.registry.find_by_name(&name).await?.is_some() {
            return Ok(None);
        }
        Ok(Some(OrphanGuard {
            _guard: Some(guard),
        }))
    }
}

struct OrphanGuard<'a> {
    _guard: Option<NameGuard<'a>>,
}
