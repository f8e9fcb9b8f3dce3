//! Per-name critical sections.

use std::sync::Arc;

use dashmap::DashMap;
use keel_common::VolumeName;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per volume name, created on demand.
///
/// An entry is evicted when its last holder releases it with no task
/// waiting, so the map only holds names with lifecycle work in flight.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: DashMap<VolumeName, Arc<Mutex<()>>>,
}

impl NameLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &VolumeName) -> NameGuard<'_> {
        let mutex = Arc::clone(self.locks.entry(name.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        NameGuard {
            locks: self,
            name: name.clone(),
            guard: Some(guard),
        }
    }

    /// Number of names currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no name is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one name; released on drop.
#[derive(Debug)]
pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: VolumeName,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's own reference is the only one left when nobody holds or waits.
        self.locks
            .locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn name(s: &str) -> VolumeName {
        VolumeName::new(s).unwrap()
    }

    #[tokio::test]
    async fn entries_are_evicted() {
        let locks = NameLocks::new();
        {
            let _a = locks.lock(&name("a")).await;
            let _b = locks.lock(&name("b")).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_name_is_serialized() {
        let locks = Arc::new(NameLocks::new());
        let guard = locks.lock(&name("a")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&name("a")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // Other names are not blocked.
        drop(locks.lock(&name("b")).await);

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
