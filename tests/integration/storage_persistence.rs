//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Polled measurements survive a restart of the SQLite backend
//! - Provisioned inventory and users are persisted
//! - Alerts resolve recipients from the database
//! - A cycle over an unreadable node list is reported as failed

use std::sync::Arc;

use senseye::config::{Inventory, StorageConfig, UserConfig};
use senseye::provision::{ensure_admin, seed_inventory, verify_password};
use senseye::storage::open_backend;
use senseye::{Device, Node, Range, Sensor};
use tempfile::tempdir;

use crate::helpers::*;

fn inventory(port: u16) -> Inventory {
    Inventory {
        nodes: vec![Node {
            id: 1,
            room: "B12".to_string(),
            address: "127.0.0.1".to_string(),
            port,
        }],
        devices: vec![Device {
            id: 1,
            kind: "fridge".to_string(),
            room: Some("B12".to_string()),
            group: Some("bio".to_string()),
        }],
        sensors: vec![Sensor {
            id: 1,
            mac: "aa:bb:cc:dd:ee:01".to_string(),
            device: Some(1),
            node: Some(1),
        }],
        ranges: vec![Range {
            device: 1,
            parameter: "temperature".to_string(),
            lower: 2.0,
            upper: 8.0,
        }],
        users: vec![UserConfig {
            username: "alice".to_string(),
            email: "alice@example.org".to_string(),
            group: "bio".to_string(),
            password: "a-long-enough-secret".to_string(),
        }],
    }
}

#[tokio::test]
async fn test_measurements_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        path: temp_dir.path().join("senseye.db"),
    };

    let reader = Arc::new(ScriptedReader::new(&[
        ("temperature", Some(12.0)),
        ("battery", Some(90.0)),
    ]));
    let port = spawn_node(reader).await;

    {
        let store = open_backend(&config).await.unwrap();
        let summary = seed_inventory(store.as_ref(), &inventory(port)).await;
        assert_eq!(summary.rejected, 0);

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(store.clone(), notifier.clone());
        let report = coordinator.poll_all().await;

        assert_eq!(report.measurements.stored, 2);
        assert_eq!(report.measurements.alerts_sent, 1);
        assert_eq!(notifier.sent.lock().unwrap()[0].0, vec!["alice@example.org".to_string()]);

        store.close().await.unwrap();
    }

    let store = open_backend(&config).await.unwrap();
    assert_eq!(store.count_measurements().await.unwrap(), 2);

    let latest = store.latest_measurements(1, "temperature", 5).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].value, Some(12.0));

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_admin_is_created_only_on_empty_database() {
    let temp_dir = tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        path: temp_dir.path().join("senseye.db"),
    };
    let admin = UserConfig {
        username: "root".to_string(),
        email: "root@example.org".to_string(),
        group: "admins".to_string(),
        password: "correct-horse-battery".to_string(),
    };

    let store = open_backend(&config).await.unwrap();
    assert!(ensure_admin(store.as_ref(), Some(&admin)).await.unwrap());
    store.close().await.unwrap();

    let store = open_backend(&config).await.unwrap();
    assert!(!ensure_admin(store.as_ref(), Some(&admin)).await.unwrap());

    let admins = store.users_in_group("admins").await.unwrap();
    assert_eq!(admins.len(), 1);
    assert!(verify_password("correct-horse-battery", &admins[0].password_hash).unwrap());

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_unreadable_node_list_is_not_an_empty_fleet() {
    let temp_dir = tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        path: temp_dir.path().join("senseye.db"),
    };
    let store = open_backend(&config).await.unwrap();
    let coordinator = coordinator(store.clone(), Arc::new(RecordingNotifier::default()));

    let empty = coordinator.poll_all().await;
    assert_eq!(empty.nodes, 0);
    assert!(empty.is_complete());
    assert_eq!(empty.error, None);

    store.close().await.unwrap();

    let failed = coordinator.poll_all().await;
    assert_eq!(failed.nodes, 0);
    assert!(!failed.is_complete());
    assert!(failed.error.is_some());
}
