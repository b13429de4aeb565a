//! Range policy and evaluation of measurements against it
//!
//! The configured ranges form a [`RangePolicy`]: an immutable map from
//! (device, parameter) to inclusive bounds. The [`RangeTable`] holds the
//! policy currently in effect and swaps in a fresh snapshot on reload, so a
//! poll cycle always evaluates against one consistent policy.
//!
//! ```text
//! battery:           value >= 20        → InRange, else LowBattery
//! configured range:  lower <= v <= upper → InRange, else OutOfRange
//! no value:                              → Unreadable (never alerts)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::storage::{StorageBackend, StorageResult};
use crate::{DeviceId, Measurement, Range};

/// Battery level (percent) below which a sensor reports low battery
pub const BATTERY_THRESHOLD: f64 = 20.0;

/// Inclusive bounds of an acceptable value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    /// Returns `None` if `lower > upper` or a bound is NaN.
    pub fn new(lower: f64, upper: f64) -> Option<Self> {
        (lower <= upper).then_some(Self { lower, upper })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Outcome of evaluating one measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    InRange,
    LowBattery { value: f64 },
    OutOfRange { value: f64, bounds: Bounds },
    /// The node reported a failed read
    Unreadable,
}

impl Verdict {
    pub fn needs_alert(&self) -> bool {
        matches!(self, Verdict::LowBattery { .. } | Verdict::OutOfRange { .. })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// Reached evaluation for a parameter that should have been discarded
    #[error("no range configured for device {device}, parameter {parameter}")]
    MissingRange { device: DeviceId, parameter: String },

    #[error("measurement carries no value")]
    NoValue,
}

/// Immutable snapshot of all configured ranges
#[derive(Debug, Clone, Default)]
pub struct RangePolicy {
    bounds: HashMap<(DeviceId, String), Bounds>,
}

impl RangePolicy {
    /// Build a policy, skipping ranges whose lower bound exceeds the upper bound
    pub fn from_ranges(ranges: impl IntoIterator<Item = Range>) -> Self {
        let mut bounds = HashMap::new();
        for range in ranges {
            match Bounds::new(range.lower, range.upper) {
                Some(b) => {
                    bounds.insert((range.device, range.parameter), b);
                }
                None => warn!(
                    "ignoring range for device {} parameter {}: lower {} > upper {}",
                    range.device, range.parameter, range.lower, range.upper
                ),
            }
        }
        Self { bounds }
    }

    pub fn bounds(&self, device: DeviceId, parameter: &str) -> Option<Bounds> {
        self.bounds.get(&(device, parameter.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Whether a measurement is stored and evaluated at all
    ///
    /// Battery readings are always accepted; everything else needs a range.
    pub fn accepts(&self, measurement: &Measurement) -> bool {
        measurement.is_battery()
            || self
                .bounds(measurement.device, &measurement.parameter)
                .is_some()
    }

    pub fn evaluate(&self, measurement: &Measurement) -> Result<Verdict, EvaluationError> {
        if measurement.is_battery() {
            return Ok(match measurement.value {
                None => Verdict::Unreadable,
                Some(value) if value >= BATTERY_THRESHOLD => Verdict::InRange,
                Some(value) => Verdict::LowBattery { value },
            });
        }

        let bounds = self
            .bounds(measurement.device, &measurement.parameter)
            .ok_or_else(|| EvaluationError::MissingRange {
                device: measurement.device,
                parameter: measurement.parameter.clone(),
            })?;

        Ok(match measurement.value {
            None => Verdict::Unreadable,
            Some(value) if bounds.contains(value) => Verdict::InRange,
            Some(value) => Verdict::OutOfRange { value, bounds },
        })
    }

    pub fn in_range(&self, measurement: &Measurement) -> Result<bool, EvaluationError> {
        match self.evaluate(measurement)? {
            Verdict::InRange => Ok(true),
            Verdict::LowBattery { .. } | Verdict::OutOfRange { .. } => Ok(false),
            Verdict::Unreadable => Err(EvaluationError::NoValue),
        }
    }
}

/// Hot-reloadable holder of the range policy in effect
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    current: Arc<RwLock<Arc<RangePolicy>>>,
}

impl RangeTable {
    pub fn new(policy: RangePolicy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    pub async fn snapshot(&self) -> Arc<RangePolicy> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, policy: RangePolicy) {
        *self.current.write().await = Arc::new(policy);
    }

    /// Load all ranges from the store and make them the policy in effect
    ///
    /// On error the previous policy stays in effect.
    #[instrument(skip_all)]
    pub async fn reload(&self, store: &dyn StorageBackend) -> StorageResult<usize> {
        let policy = RangePolicy::from_ranges(store.list_ranges().await?);
        let count = policy.len();
        self.replace(policy).await;
        debug!("range policy reloaded with {count} ranges");
        Ok(count)
    }
}
