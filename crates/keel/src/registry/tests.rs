//! Registry contract tests, run against every implementation.

use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use keel_common::{KeelError, VolumeName};
use serde_json::json;

use super::{MemoryRegistry, Registry, SqliteRegistry};
use crate::volume::{BackendConfig, BackendType, LocalConfig, Volume};

fn volume(name: &str, offset_secs: i64) -> Volume {
    let name = VolumeName::new(name).unwrap();
    Volume {
        host_path: PathBuf::from("/var/lib/keel/volumes")
            .join(name.as_str())
            .join("_data"),
        name,
        config: BackendConfig::Local(LocalConfig::default()),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + Duration::seconds(offset_secs),
    }
}

fn nfs_volume(name: &str) -> Volume {
    let raw = json!({
        "server": "10.0.0.2",
        "exportPath": "/exports/db",
        "version": "3",
        "port": 2049,
        "readOnly": true
    });
    Volume {
        config: BackendConfig::decode(BackendType::Nfs, Some(&raw)).unwrap(),
        ..volume(name, 0)
    }
}

async fn insert_find_delete(registry: &dyn Registry) {
    let data = volume("data", 0);
    let name = data.name.clone();

    assert!(registry.find_by_name(&name).await.unwrap().is_none());
    registry.insert(&data).await.unwrap();
    assert_eq!(registry.find_by_name(&name).await.unwrap(), Some(data));

    registry.delete(&name).await.unwrap();
    assert!(registry.find_by_name(&name).await.unwrap().is_none());
    assert!(matches!(
        registry.delete(&name).await,
        Err(KeelError::NotFound { .. })
    ));
}

async fn duplicate_insert_conflicts(registry: &dyn Registry) {
    registry.insert(&volume("dup", 0)).await.unwrap();
    let err = registry.insert(&volume("dup", 5)).await.unwrap_err();
    assert!(matches!(err, KeelError::Conflict { name } if name == "dup"));
    assert_eq!(registry.list().await.unwrap().len(), 1);
}

async fn list_orders_by_creation(registry: &dyn Registry) {
    registry.insert(&volume("late", 60)).await.unwrap();
    registry.insert(&volume("early", 0)).await.unwrap();
    registry.insert(&volume("tie-b", 30)).await.unwrap();
    registry.insert(&volume("tie-a", 30)).await.unwrap();

    let names: Vec<String> = registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name.to_string())
        .collect();
    assert_eq!(names, vec!["early", "tie-b", "tie-a", "late"]);
}

async fn config_round_trips(registry: &dyn Registry) {
    let db = nfs_volume("db");
    registry.insert(&db).await.unwrap();
    let found = registry.find_by_name(&db.name).await.unwrap().unwrap();
    assert_eq!(found.backend_type(), BackendType::Nfs);
    assert_eq!(found.config, db.config);
}

async fn list_after_removal_keeps_order(registry: &dyn Registry) {
    for (name, offset) in [("a", 0), ("b", 1), ("c", 2)] {
        registry.insert(&volume(name, offset)).await.unwrap();
    }
    registry.delete(&VolumeName::new("b").unwrap()).await.unwrap();

    let names: Vec<String> = registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.name.to_string())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
}

macro_rules! contract {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn insert_find_delete() {
                super::insert_find_delete(&$make).await;
            }

            #[tokio::test]
            async fn duplicate_insert_conflicts() {
                super::duplicate_insert_conflicts(&$make).await;
            }

            #[tokio::test]
            async fn list_orders_by_creation() {
                super::list_orders_by_creation(&$make).await;
            }

            #[tokio::test]
            async fn list_after_removal_keeps_order() {
                super::list_after_removal_keeps_order(&$make).await;
            }

            #[tokio::test]
            async fn config_round_trips() {
                super::config_round_trips(&$make).await;
            }
        }
    };
}

contract!(memory, MemoryRegistry::new());
contract!(sqlite, SqliteRegistry::in_memory().await.unwrap());

#[tokio::test]
async fn sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("keel.db");

    let registry = SqliteRegistry::open(&path).await.unwrap();
    registry.insert(&nfs_volume("db")).await.unwrap();
    registry.close().await;

    let reopened = SqliteRegistry::open(&path).await.unwrap();
    let volumes = reopened.list().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0], nfs_volume("db"));
}

#[test_log::test(tokio::test)]
async fn sqlite_skips_unreadable_rows() {
    let registry = SqliteRegistry::in_memory().await.unwrap();
    registry.insert(&volume("good", 0)).await.unwrap();

    sqlx::query(
        "INSERT INTO volumes (name, host_path, backend, config, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind("broken")
    .bind("/x/broken/_data")
    .bind("nfs")
    .bind("{\"server\": 1}")
    .bind("2024-01-01T12:00:01.000000000Z")
    .execute(registry.pool())
    .await
    .unwrap();

    let volumes = registry.list().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name.as_str(), "good");

    let broken = VolumeName::new("broken").unwrap();
    let err = registry.find_by_name(&broken).await.unwrap_err();
    assert!(matches!(err, KeelError::Internal { .. }));
}

#[tokio::test]
async fn sqlite_concurrent_inserts_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SqliteRegistry::open(&dir.path().join("keel.db"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for offset in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.insert(&volume("race", offset)).await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(KeelError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(ok, 1);
}
