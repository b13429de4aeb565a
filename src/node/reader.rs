use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::protocol::SensorDescriptor;
use crate::{BATTERY, Measurement};

/// Reads the current values of one physical sensor
///
/// Each deployment picks one reader. An error means the sensor could not be
/// read at all; the agent then reports no readings for it.
#[async_trait]
pub trait SensorReader: Send + Sync {
    async fn read(&self, sensor: &SensorDescriptor) -> anyhow::Result<Vec<Measurement>>;
}

/// Parameters reported by every mock-up sensor
pub const MOCKUP_PARAMETERS: [&str; 3] = ["temperature", "humidity", BATTERY];

/// Produces random readings for nodes without attached hardware
#[derive(Debug, Clone, Copy, Default)]
pub struct MockupReader;

impl MockupReader {
    fn sample(sensor: &SensorDescriptor) -> Vec<Measurement> {
        let mut rng = rand::thread_rng();
        let time = Utc::now();
        MOCKUP_PARAMETERS
            .iter()
            .map(|parameter| Measurement {
                device: sensor.device,
                sensor: sensor.id,
                parameter: parameter.to_string(),
                time,
                value: Some(rng.gen_range(0..=75) as f64),
            })
            .collect()
    }
}

#[async_trait]
impl SensorReader for MockupReader {
    async fn read(&self, sensor: &SensorDescriptor) -> anyhow::Result<Vec<Measurement>> {
        Ok(Self::sample(sensor))
    }
}
