//! Active mounter tracking.

use std::collections::{HashMap, HashSet};

use keel_common::VolumeName;
use parking_lot::Mutex;

/// What remains after a mounter ID is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// No users were ever recorded for the volume, e.g. after a restart.
    Unknown,
    /// Number of users still holding the volume.
    Remaining(usize),
}

impl Release {
    /// Whether the backend should be detached.
    #[must_use]
    pub const fn should_detach(self) -> bool {
        matches!(self, Self::Unknown | Self::Remaining(0))
    }
}

/// Mounter IDs currently using each volume. Held in memory only.
#[derive(Debug, Default)]
pub struct ActiveUsers {
    users: Mutex<HashMap<VolumeName, HashSet<String>>>,
}

impl ActiveUsers {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as using `name`. Returns the number of users afterwards.
    pub fn acquire(&self, name: &VolumeName, id: &str) -> usize {
        let mut users = self.users.lock();
        let ids = users.entry(name.clone()).or_default();
        ids.insert(id.to_string());
        ids.len()
    }

    /// Release `id` from `name`.
    pub fn release(&self, name: &VolumeName, id: &str) -> Release {
        let mut users = self.users.lock();
        let Some(ids) = users.get_mut(name) else {
            return Release::Unknown;
        };
        ids.remove(id);
        let remaining = ids.len();
        if remaining == 0 {
            users.remove(name);
        }
        Release::Remaining(remaining)
    }

    /// Drop every user of `name`.
    pub fn forget(&self, name: &VolumeName) {
        self.users.lock().remove(name);
    }

    /// Number of users of `name`.
    #[must_use]
    pub fn count(&self, name: &VolumeName) -> usize {
        self.users.lock().get(name).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_release_detaches() {
        let users = ActiveUsers::new();
        let name = VolumeName::new("data").unwrap();

        assert_eq!(users.release(&name, "a"), Release::Unknown);
        assert!(users.release(&name, "a").should_detach());

        assert_eq!(users.acquire(&name, "a"), 1);
        assert_eq!(users.acquire(&name, "b"), 2);
        assert_eq!(users.acquire(&name, "b"), 2);

        let release = users.release(&name, "a");
        assert_eq!(release, Release::Remaining(1));
        assert!(!release.should_detach());

        // Unknown IDs do not release other users.
        assert_eq!(users.release(&name, "zzz"), Release::Remaining(1));

        assert!(users.release(&name, "b").should_detach());
        assert_eq!(users.count(&name), 0);
    }
}
