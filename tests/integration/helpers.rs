//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use senseye::alerts::AlertManager;
use senseye::coordinator::FleetCoordinator;
use senseye::mailer::{Notifier, NotifyError};
use senseye::node::{NodeAgent, NodeClient, SensorReader};
use senseye::protocol::{PollRequest, SensorDescriptor, read_frame};
use senseye::storage::{MemoryBackend, StorageBackend};
use senseye::{Device, Measurement, Node, Range, Sensor, User};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

pub const NODE_TIMEOUT: Duration = Duration::from_millis(500);

/// Answers every sensor with the same configured readings
#[derive(Default)]
pub struct ScriptedReader {
    readings: Mutex<Vec<(String, Option<f64>)>>,
    /// Fixed timestamp for all readings; `None` means "now"
    time: Option<DateTime<Utc>>,
    /// Keeps consecutive reads at distinct milliseconds
    reads: AtomicI64,
}

impl ScriptedReader {
    pub fn new(readings: &[(&str, Option<f64>)]) -> Self {
        Self {
            readings: Mutex::new(
                readings
                    .iter()
                    .map(|(p, v)| (p.to_string(), *v))
                    .collect(),
            ),
            time: None,
            reads: AtomicI64::new(0),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn set(&self, readings: &[(&str, Option<f64>)]) {
        *self.readings.lock().unwrap() = readings
            .iter()
            .map(|(p, v)| (p.to_string(), *v))
            .collect();
    }
}

#[async_trait]
impl SensorReader for ScriptedReader {
    async fn read(&self, sensor: &SensorDescriptor) -> anyhow::Result<Vec<Measurement>> {
        let offset = chrono::Duration::milliseconds(self.reads.fetch_add(1, Ordering::SeqCst));
        let time = self.time.unwrap_or_else(|| Utc::now() + offset);
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .map(|(parameter, value)| Measurement {
                device: sensor.device,
                sensor: sensor.id,
                parameter: parameter.clone(),
                time,
                value: *value,
            })
            .collect())
    }
}

/// Reports readings for a sensor the hub never asked about
pub struct ImpostorReader;

#[async_trait]
impl SensorReader for ImpostorReader {
    async fn read(&self, sensor: &SensorDescriptor) -> anyhow::Result<Vec<Measurement>> {
        Ok(vec![Measurement {
            device: sensor.device,
            sensor: sensor.id + 1000,
            parameter: "battery".to_string(),
            time: Utc::now(),
            value: Some(1.0),
        }])
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Vec<String>, String, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((
            recipients.to_vec(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

/// Rejects every message, like a mail server that refuses the recipients
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _: &[String], _: &str, _: &str) -> Result<(), NotifyError> {
        let error = "not-an-address".parse::<lettre::Address>().unwrap_err();
        Err(NotifyError::Address(error))
    }
}

/// Start a node agent on an ephemeral local port
pub async fn spawn_node(reader: Arc<dyn SensorReader>) -> u16 {
    let agent = NodeAgent::bind("127.0.0.1:0", reader).await.unwrap();
    let port = agent.local_addr().unwrap().port();
    agent.spawn();
    port
}

/// Start a listener that accepts connections but never answers
pub async fn spawn_silent_node() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });
    port
}

/// Start a listener that answers every connection with bytes that are no frame
pub async fn spawn_garbage_node() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = read_frame::<_, PollRequest>(&mut stream).await;
            let _ = stream.write_all(&[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']).await;
            open.push(stream);
        }
    });
    port
}

/// A port nothing listens on
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub struct Fleet {
    pub store: Arc<MemoryBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: FleetCoordinator,
}

impl Fleet {
    pub fn new() -> Self {
        let store = Arc::new(MemoryBackend::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = coordinator(store.clone(), notifier.clone());
        Self {
            store,
            notifier,
            coordinator,
        }
    }
}

pub fn coordinator(
    store: Arc<dyn StorageBackend>,
    notifier: Arc<dyn Notifier>,
) -> FleetCoordinator {
    let alerts = AlertManager::new(store.clone(), notifier);
    FleetCoordinator::new(store, NodeClient::new(NODE_TIMEOUT), alerts, 4)
}

/// Register a device in group "bio" with one sensor on the given node
pub async fn register_device(store: &dyn StorageBackend, node: i64, port: u16, device: i64) {
    if store.get_node(node).await.unwrap().is_none() {
        store
            .upsert_node(&Node {
                id: node,
                room: format!("room-{node}"),
                address: "127.0.0.1".to_string(),
                port,
            })
            .await
            .unwrap();
    }
    store
        .upsert_device(&Device {
            id: device,
            kind: "fridge".to_string(),
            room: Some("B12".to_string()),
            group: Some("bio".to_string()),
        })
        .await
        .unwrap();
    store
        .upsert_sensor(&Sensor {
            id: device,
            mac: format!("aa:bb:cc:dd:ee:{device:02x}"),
            device: Some(device),
            node: Some(node),
        })
        .await
        .unwrap();
}

pub async fn add_range(store: &dyn StorageBackend, device: i64, parameter: &str, lower: f64, upper: f64) {
    store
        .upsert_range(&Range {
            device,
            parameter: parameter.to_string(),
            lower,
            upper,
        })
        .await
        .unwrap();
}

pub async fn add_user(store: &dyn StorageBackend, name: &str, group: &str) {
    store
        .insert_user(&User {
            username: name.to_string(),
            email: format!("{name}@example.org"),
            group: group.to_string(),
            password_hash: String::new(),
        })
        .await
        .unwrap();
}
