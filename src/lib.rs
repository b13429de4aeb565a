pub mod actors;
pub mod alerts;
pub mod config;
pub mod coordinator;
pub mod mailer;
pub mod monitors;
pub mod node;
pub mod protocol;
pub mod provision;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NodeId = i64;
pub type SensorId = i64;
pub type DeviceId = i64;

/// Parameter name reserved for battery readings.
///
/// Battery readings are always stored and evaluated, even without a
/// configured range for the device.
pub const BATTERY: &str = "battery";

/// A remote node with attached sensors, reachable over TCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub room: String,
    pub address: String,
    #[serde(default = "crate::node::listen::default_port")]
    pub port: u16,
}

impl Node {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A physical sensor. Sensors without a device are never polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub mac: String,
    pub device: Option<DeviceId>,
    pub node: Option<NodeId>,
}

/// The logical equipment a sensor is attached to (e.g. a fridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub room: Option<String>,
    pub group: Option<String>,
}

impl Device {
    pub fn room_label(&self) -> &str {
        self.room.as_deref().unwrap_or("unknown")
    }
}

/// Acceptable bounds for one parameter of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub device: DeviceId,
    pub parameter: String,
    pub lower: f64,
    pub upper: f64,
}

/// One timestamped reading of a parameter.
///
/// A `None` value marks a failed read on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub device: DeviceId,
    pub sensor: SensorId,
    pub parameter: String,
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

impl Measurement {
    pub fn is_battery(&self) -> bool {
        self.parameter == BATTERY
    }
}

/// An alert recipient. Users receive alerts for all devices of their group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub group: String,
    pub password_hash: String,
}
