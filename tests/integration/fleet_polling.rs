//! End-to-end poll cycles against local node agents
//!
//! Every test runs real TCP nodes on ephemeral ports and an in-memory store.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use senseye::alerts::ALERT_SUBJECT;
use senseye::storage::StorageBackend;

use crate::helpers::*;

#[tokio::test]
async fn test_value_in_range_raises_no_alert() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("temperature", Some(25.0))]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 30.0).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.failed_nodes, Vec::<i64>::new());
    assert_eq!(report.measurements.stored, 1);
    assert_eq!(report.measurements.alerts_sent, 0);
    assert_eq!(fleet.notifier.count(), 0);
}

#[tokio::test]
async fn test_out_of_range_alerts_whole_group() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("temperature", Some(35.0))]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 30.0).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;
    add_user(fleet.store.as_ref(), "bob", "bio").await;
    add_user(fleet.store.as_ref(), "carol", "chem").await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.measurements.stored, 1);
    assert_eq!(report.measurements.alerts_sent, 1);

    let sent = fleet.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (recipients, subject, body) = &sent[0];
    assert_eq!(
        recipients,
        &vec!["alice@example.org".to_string(), "bob@example.org".to_string()]
    );
    assert_eq!(subject, ALERT_SUBJECT);
    assert!(body.contains("temperature: 35 (allowed: 10 - 30)"));
}

#[tokio::test]
async fn test_low_battery_alert_without_configured_range() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("battery", Some(15.0))]));
    let port = spawn_node(reader.clone()).await;
    register_device(fleet.store.as_ref(), 1, port, 3).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;
    assert_eq!(report.measurements.stored, 1);
    assert_eq!(report.measurements.alerts_sent, 1);
    {
        let sent = fleet.notifier.sent.lock().unwrap();
        assert_eq!(sent[0].2, "Battery of sensor 3 in fridge 3 (room B12) is low!");
    }

    reader.set(&[("battery", Some(21.0))]);
    let report = fleet.coordinator.poll_all().await;
    assert_eq!(report.measurements.stored, 1);
    assert_eq!(report.measurements.alerts_sent, 0);
    assert_eq!(fleet.notifier.count(), 1);
}

#[tokio::test]
async fn test_unconfigured_parameter_is_never_stored() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[
        ("pressure", Some(1013.0)),
        ("temperature", Some(20.0)),
    ]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 30.0).await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.measurements.received, 2);
    assert_eq!(report.measurements.discarded, 1);
    assert_eq!(report.measurements.stored, 1);
    assert!(
        fleet
            .store
            .latest_measurements(1, "pressure", 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_timed_out_node_does_not_affect_others() {
    let fleet = Fleet::new();
    let silent = spawn_silent_node().await;
    let reader = Arc::new(ScriptedReader::new(&[
        ("temperature", Some(20.0)),
        ("humidity", Some(45.0)),
        ("battery", Some(80.0)),
    ]));
    let healthy = spawn_node(reader).await;

    register_device(fleet.store.as_ref(), 1, silent, 1).await;
    register_device(fleet.store.as_ref(), 2, healthy, 2).await;
    add_range(fleet.store.as_ref(), 2, "temperature", 10.0, 30.0).await;
    add_range(fleet.store.as_ref(), 2, "humidity", 30.0, 60.0).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.nodes, 2);
    assert_eq!(report.failed_nodes, vec![1]);
    assert_eq!(report.measurements.stored, 3);
    assert_eq!(report.measurements.alerts_sent, 0);
    assert_eq!(fleet.store.count_measurements().await.unwrap(), 3);
}

#[tokio::test]
async fn test_unreadable_value_is_stored_without_alert() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("temperature", None)]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 30.0).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.measurements.stored, 1);
    assert_eq!(report.measurements.unreadable, 1);
    assert_eq!(fleet.notifier.count(), 0);
}

#[tokio::test]
async fn test_repeated_reading_is_stored_and_alerted_once() {
    let fleet = Fleet::new();
    let time = Utc.with_ymd_and_hms(2019, 2, 26, 9, 30, 0).unwrap();
    let reader = Arc::new(ScriptedReader::new(&[("battery", Some(5.0))]).at(time));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let first = fleet.coordinator.poll_all().await;
    let second = fleet.coordinator.poll_all().await;

    assert_eq!(first.measurements.stored, 1);
    assert_eq!(second.measurements.stored, 0);
    assert_eq!(second.measurements.conflicts, 1);
    assert_eq!(fleet.store.count_measurements().await.unwrap(), 1);
    assert_eq!(fleet.notifier.count(), 1);
}

#[tokio::test]
async fn test_readings_for_unrequested_sensors_are_rejected() {
    let fleet = Fleet::new();
    let port = spawn_node(Arc::new(ImpostorReader)).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.measurements.rejected, 1);
    assert_eq!(report.measurements.stored, 0);
    assert_eq!(fleet.notifier.count(), 0);
}

#[tokio::test]
async fn test_range_changes_apply_to_next_cycle() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("temperature", Some(25.0))]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 1, port, 1).await;
    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 30.0).await;
    add_user(fleet.store.as_ref(), "alice", "bio").await;

    let report = fleet.coordinator.poll_all().await;
    assert_eq!(report.measurements.alerts_sent, 0);

    add_range(fleet.store.as_ref(), 1, "temperature", 10.0, 20.0).await;

    let report = fleet.coordinator.poll_all().await;
    assert_eq!(report.measurements.alerts_sent, 1);
}

#[tokio::test]
async fn test_poll_single_node_by_id() {
    let fleet = Fleet::new();
    let reader = Arc::new(ScriptedReader::new(&[("battery", Some(90.0))]));
    let port = spawn_node(reader).await;
    register_device(fleet.store.as_ref(), 4, port, 1).await;

    let tally = fleet.coordinator.poll_node_by_id(4).await.unwrap();

    assert_eq!(tally.received, 1);
    assert_eq!(tally.stored, 1);
}

#[tokio::test]
async fn test_many_nodes_polled_in_one_cycle() {
    let fleet = Fleet::new();
    for id in 1..=10 {
        let reader = Arc::new(ScriptedReader::new(&[("battery", Some(50.0))]));
        let port = spawn_node(reader).await;
        register_device(fleet.store.as_ref(), id, port, id).await;
    }

    let report = fleet.coordinator.poll_all().await;

    assert_eq!(report.nodes, 10);
    assert_eq!(report.succeeded_nodes(), 10);
    assert_eq!(report.measurements.stored, 10);
}
