use std::sync::Arc;

use tracing::{info, instrument};

use crate::mailer::{Notifier, NotifyError};
use crate::monitors::ranges::Verdict;
use crate::storage::{StorageBackend, StorageError};
use crate::{Device, DeviceId, Measurement};

/// Subject of every alert mail
pub const ALERT_SUBJECT: &str = "Senseye Alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent { recipients: usize },
    /// The device's group has no members, or the device has no group
    NoRecipients,
    /// The verdict does not call for an alert
    NotNeeded,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("device {0} is not registered")]
    UnknownDevice(DeviceId),

    #[error("failed to resolve alert data: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to deliver alert: {0}")]
    Notify(#[from] NotifyError),
}

/// Composes alert messages and delivers them to the device's group
#[derive(Clone)]
pub struct AlertManager {
    store: Arc<dyn StorageBackend>,
    notifier: Arc<dyn Notifier>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn StorageBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Text of the alert for `verdict`, or `None` if nothing is wrong
    pub fn compose(device: &Device, measurement: &Measurement, verdict: &Verdict) -> Option<String> {
        match verdict {
            Verdict::LowBattery { .. } => Some(format!(
                "Battery of sensor {} in {} {} (room {}) is low!",
                measurement.sensor,
                device.kind,
                device.id,
                device.room_label()
            )),
            Verdict::OutOfRange { value, bounds } => {
                let intro = "The Senseye system has measured a value that is out of the range \
                             set for the respective device. The following device is affected:";
                let affected = format!(
                    "{} (ID: {}) in room {}.",
                    device.kind,
                    device.id,
                    device.room_label()
                );
                let reading = format!(
                    "{}: {}: {} (allowed: {} - {})",
                    measurement.time.format("%Y-%m-%d %H:%M:%S UTC"),
                    measurement.parameter,
                    value,
                    bounds.lower,
                    bounds.upper
                );
                Some(format!("{intro}\n\n{affected}\n{reading}"))
            }
            Verdict::InRange | Verdict::Unreadable => None,
        }
    }

    /// Email addresses of all users in the device's group
    pub async fn recipients(&self, device: &Device) -> Result<Vec<String>, StorageError> {
        let Some(group) = &device.group else {
            return Ok(Vec::new());
        };

        Ok(self
            .store
            .users_in_group(group)
            .await?
            .into_iter()
            .map(|user| user.email)
            .collect())
    }

    /// Notify the device's group about an offending measurement
    ///
    /// Delivery is attempted once; the stored measurement is unaffected by
    /// the outcome.
    #[instrument(skip_all, fields(device = measurement.device, sensor = measurement.sensor, parameter = %measurement.parameter))]
    pub async fn alert(
        &self,
        measurement: &Measurement,
        verdict: &Verdict,
    ) -> Result<AlertOutcome, AlertError> {
        if !verdict.needs_alert() {
            return Ok(AlertOutcome::NotNeeded);
        }

        let device = self
            .store
            .get_device(measurement.device)
            .await?
            .ok_or(AlertError::UnknownDevice(measurement.device))?;

        let Some(body) = Self::compose(&device, measurement, verdict) else {
            return Ok(AlertOutcome::NotNeeded);
        };

        let recipients = self.recipients(&device).await?;
        if recipients.is_empty() {
            info!(
                "no recipients for {} {} (group {:?}), alert not sent",
                device.kind, device.id, device.group
            );
            return Ok(AlertOutcome::NoRecipients);
        }

        self.notifier
            .send(&recipients, ALERT_SUBJECT, &body)
            .await?;

        Ok(AlertOutcome::Sent {
            recipients: recipients.len(),
        })
    }
}
