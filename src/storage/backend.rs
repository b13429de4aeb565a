//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;

use super::error::StorageResult;
use crate::{Device, DeviceId, Measurement, Node, NodeId, Range, Sensor, User};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The coordinator only reads nodes, sensors, devices, ranges and users and
/// appends measurements. The `upsert_*` methods exist for provisioning the
/// fleet inventory at startup.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: every node task of a poll cycle
/// writes through the same backend concurrently.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// All registered nodes, ordered by id
    async fn list_nodes(&self) -> StorageResult<Vec<Node>>;

    async fn get_node(&self, id: NodeId) -> StorageResult<Option<Node>>;

    /// Sensors of a node that are attached to a device
    ///
    /// Sensors without a device are never returned.
    async fn attached_sensors(&self, node: NodeId) -> StorageResult<Vec<Sensor>>;

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<Device>>;

    async fn list_ranges(&self) -> StorageResult<Vec<Range>>;

    /// Users whose group equals `group`
    async fn users_in_group(&self, group: &str) -> StorageResult<Vec<User>>;

    async fn count_users(&self) -> StorageResult<usize>;

    /// Append a single measurement in its own transaction
    ///
    /// Returns `StorageError::Conflict` if a measurement with the same
    /// (device, sensor, parameter, time) key is already stored. Stored
    /// measurements are never overwritten.
    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<()>;

    /// The most recent measurements of a device parameter, newest first
    async fn latest_measurements(
        &self,
        device: DeviceId,
        parameter: &str,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>>;

    async fn count_measurements(&self) -> StorageResult<usize>;

    async fn upsert_node(&self, node: &Node) -> StorageResult<()>;

    async fn upsert_device(&self, device: &Device) -> StorageResult<()>;

    async fn upsert_sensor(&self, sensor: &Sensor) -> StorageResult<()>;

    /// Insert or replace a range. Rejects ranges with `lower > upper`.
    async fn upsert_range(&self, range: &Range) -> StorageResult<()>;

    /// Insert a new user. Returns `StorageError::Conflict` for a taken username.
    async fn insert_user(&self, user: &User) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

pub(crate) fn check_range(range: &Range) -> StorageResult<()> {
    if range.lower > range.upper || range.lower.is_nan() || range.upper.is_nan() {
        return Err(super::StorageError::InvalidRow(format!(
            "range ({}, {}) has lower bound {} above upper bound {}",
            range.device, range.parameter, range.lower, range.upper
        )));
    }
    Ok(())
}
