//! In-memory storage backend (no persistence)
//!
//! This backend keeps every table in ordered maps behind an async lock.
//! It's useful for:
//! - Testing without database dependencies
//! - Deployments that do not need history (`"backend": "none"`)
//!
//! It enforces the same keys as the SQLite schema, so duplicate
//! measurements are rejected with `StorageError::Conflict`.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend, check_range};
use super::error::{StorageError, StorageResult};
use crate::{Device, DeviceId, Measurement, Node, NodeId, Range, Sensor, SensorId, User};

type MeasurementKey = (DeviceId, SensorId, String, i64);

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<NodeId, Node>,
    devices: BTreeMap<DeviceId, Device>,
    sensors: BTreeMap<SensorId, Sensor>,
    ranges: BTreeMap<(DeviceId, String), Range>,
    users: BTreeMap<String, User>,
    measurements: BTreeMap<MeasurementKey, Measurement>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

fn measurement_key(measurement: &Measurement) -> MeasurementKey {
    (
        measurement.device,
        measurement.sensor,
        measurement.parameter.clone(),
        measurement.time.timestamp_millis(),
    )
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list_nodes(&self) -> StorageResult<Vec<Node>> {
        Ok(self.tables.read().await.nodes.values().cloned().collect())
    }

    async fn get_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        Ok(self.tables.read().await.nodes.get(&id).cloned())
    }

    async fn attached_sensors(&self, node: NodeId) -> StorageResult<Vec<Sensor>> {
        Ok(self
            .tables
            .read()
            .await
            .sensors
            .values()
            .filter(|sensor| sensor.node == Some(node) && sensor.device.is_some())
            .cloned()
            .collect())
    }

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<Device>> {
        Ok(self.tables.read().await.devices.get(&id).cloned())
    }

    async fn list_ranges(&self) -> StorageResult<Vec<Range>> {
        Ok(self.tables.read().await.ranges.values().cloned().collect())
    }

    async fn users_in_group(&self, group: &str) -> StorageResult<Vec<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|user| user.group == group)
            .cloned()
            .collect())
    }

    async fn count_users(&self) -> StorageResult<usize> {
        Ok(self.tables.read().await.users.len())
    }

    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        if !tables.devices.contains_key(&measurement.device) {
            return Err(StorageError::InvalidRow(format!(
                "unknown device {}",
                measurement.device
            )));
        }
        if !tables.sensors.contains_key(&measurement.sensor) {
            return Err(StorageError::InvalidRow(format!(
                "unknown sensor {}",
                measurement.sensor
            )));
        }

        let key = measurement_key(measurement);
        if tables.measurements.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "measurements({}, {}, {}, {})",
                key.0, key.1, key.2, measurement.time
            )));
        }

        tables.measurements.insert(key, measurement.clone());
        Ok(())
    }

    async fn latest_measurements(
        &self,
        device: DeviceId,
        parameter: &str,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>> {
        let tables = self.tables.read().await;
        let mut measurements: Vec<Measurement> = tables
            .measurements
            .values()
            .filter(|m| m.device == device && m.parameter == parameter)
            .cloned()
            .collect();
        measurements.sort_by(|a, b| b.time.cmp(&a.time));
        measurements.truncate(limit);
        Ok(measurements)
    }

    async fn count_measurements(&self) -> StorageResult<usize> {
        Ok(self.tables.read().await.measurements.len())
    }

    async fn upsert_node(&self, node: &Node) -> StorageResult<()> {
        self.tables.write().await.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn upsert_device(&self, device: &Device) -> StorageResult<()> {
        self.tables
            .write()
            .await
            .devices
            .insert(device.id, device.clone());
        Ok(())
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(device) = sensor.device
            && !tables.devices.contains_key(&device)
        {
            return Err(StorageError::InvalidRow(format!("unknown device {device}")));
        }
        if let Some(node) = sensor.node
            && !tables.nodes.contains_key(&node)
        {
            return Err(StorageError::InvalidRow(format!("unknown node {node}")));
        }
        tables.sensors.insert(sensor.id, sensor.clone());
        Ok(())
    }

    async fn upsert_range(&self, range: &Range) -> StorageResult<()> {
        check_range(range)?;
        let mut tables = self.tables.write().await;
        if !tables.devices.contains_key(&range.device) {
            return Err(StorageError::InvalidRow(format!(
                "unknown device {}",
                range.device
            )));
        }
        tables
            .ranges
            .insert((range.device, range.parameter.clone()), range.clone());
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.username) {
            return Err(StorageError::Conflict(format!("user {}", user.username)));
        }
        tables.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "measurements".to_string(),
                    tables.measurements.len().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
