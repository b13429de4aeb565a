//! Both ends of the node link
//!
//! - [`client`]: used by the hub to query one node per poll
//! - [`agent`]: runs on a node, answers poll requests by reading its sensors
//! - [`listen`]: the agent's listen address
//! - [`reader`]: the seam to the physical sensors

pub mod agent;
pub mod client;
pub mod listen;
pub mod reader;

pub use agent::NodeAgent;
pub use client::{NodeClient, NodeError};
pub use listen::{DEFAULT_PORT, listen_addr};
pub use reader::{MockupReader, SensorReader};
