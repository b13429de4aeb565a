//! FleetCoordinator - one poll cycle over every registered node
//!
//! ## Cycle
//!
//! ```text
//! reload ranges → list nodes → spawn one task per node (bounded) → join all → CycleReport
//!
//! per node:
//!   attached sensors → NodeClient::poll → for each measurement:
//!       not accepted by policy → discard
//!       insert (own transaction) → conflict/error: skip
//!       evaluate → LowBattery / OutOfRange: alert
//! ```
//!
//! Every failure is scoped to one node or one measurement. Nothing that
//! happens while polling a node reaches the other nodes' tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::{AlertManager, AlertOutcome};
use crate::monitors::ranges::{RangePolicy, RangeTable, Verdict};
use crate::node::{NodeClient, NodeError};
use crate::protocol::SensorDescriptor;
use crate::storage::{StorageBackend, StorageError, StorageResult};
use crate::{DeviceId, Measurement, Node, NodeId, SensorId};

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("node {0} is not registered")]
    UnknownNode(NodeId),

    #[error("failed to load sensors: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// What happened to the measurements of one node (or a whole cycle)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasurementTally {
    /// Measurements returned by the node
    pub received: usize,
    pub stored: usize,
    /// Parameters without a range (and not battery)
    pub discarded: usize,
    /// Measurements for sensors the node was not asked about
    pub rejected: usize,
    pub conflicts: usize,
    pub storage_errors: usize,
    pub evaluation_errors: usize,
    pub unreadable: usize,
    pub alerts_sent: usize,
    pub alerts_unrouted: usize,
    pub alerts_failed: usize,
}

impl MeasurementTally {
    fn absorb(&mut self, other: MeasurementTally) {
        self.received += other.received;
        self.stored += other.stored;
        self.discarded += other.discarded;
        self.rejected += other.rejected;
        self.conflicts += other.conflicts;
        self.storage_errors += other.storage_errors;
        self.evaluation_errors += other.evaluation_errors;
        self.unreadable += other.unreadable;
        self.alerts_sent += other.alerts_sent;
        self.alerts_unrouted += other.alerts_unrouted;
        self.alerts_failed += other.alerts_failed;
    }
}

/// Summary of one completed poll cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Nodes a poll was dispatched to
    pub nodes: usize,
    /// Nodes whose poll failed as a whole, sorted by id
    pub failed_nodes: Vec<NodeId>,
    /// Node tasks that panicked
    pub panicked: usize,
    pub measurements: MeasurementTally,
    /// Set when the node list could not be read and nothing was polled
    pub error: Option<String>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration: Duration::ZERO,
            nodes: 0,
            failed_nodes: Vec::new(),
            panicked: 0,
            measurements: MeasurementTally::default(),
            error: None,
        }
    }

    /// Whether the cycle got as far as dispatching the fleet
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn succeeded_nodes(&self) -> usize {
        self.nodes - self.failed_nodes.len() - self.panicked
    }
}

/// Polls all nodes, stores their measurements and raises alerts
#[derive(Clone)]
pub struct FleetCoordinator {
    store: Arc<dyn StorageBackend>,
    client: NodeClient,
    ranges: RangeTable,
    alerts: AlertManager,
    limiter: Arc<Semaphore>,
}

impl FleetCoordinator {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        client: NodeClient,
        alerts: AlertManager,
        max_concurrent_polls: usize,
    ) -> Self {
        Self {
            store,
            client,
            ranges: RangeTable::default(),
            alerts,
            limiter: Arc::new(Semaphore::new(max_concurrent_polls.max(1))),
        }
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    pub async fn reload_ranges(&self) -> StorageResult<usize> {
        self.ranges.reload(self.store.as_ref()).await
    }

    /// Run one poll cycle over every registered node
    ///
    /// Returns once every node task has finished.
    #[instrument(skip(self))]
    pub async fn poll_all(&self) -> CycleReport {
        let clock = Instant::now();
        let mut report = CycleReport::new(Utc::now());

        if let Err(e) = self.reload_ranges().await {
            warn!("failed to reload ranges, keeping previous policy: {e}");
        }
        let policy = self.ranges.snapshot().await;

        let nodes = match self.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("failed to list nodes: {e}");
                report.error = Some(e.to_string());
                report.duration = clock.elapsed();
                return report;
            }
        };

        report.nodes = nodes.len();
        debug!("polling {} nodes", nodes.len());

        let mut tasks = JoinSet::new();
        for node in nodes {
            let this = self.clone();
            let policy = policy.clone();
            tasks.spawn(async move {
                // the semaphore is never closed
                let _permit = this.limiter.clone().acquire_owned().await.ok();
                let result = this.poll_node_with(&node, &policy).await;
                (node.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(tally))) => report.measurements.absorb(tally),
                Ok((node, Err(e))) => {
                    error!("polling node {node} failed: {e}");
                    report.failed_nodes.push(node);
                }
                Err(e) => {
                    error!("node task aborted: {e}");
                    report.panicked += 1;
                }
            }
        }

        report.failed_nodes.sort_unstable();
        report.duration = clock.elapsed();

        info!(
            "poll cycle finished in {:?}: {} of {} nodes answered, {} stored, {} alerts sent",
            report.duration,
            report.succeeded_nodes(),
            report.nodes,
            report.measurements.stored,
            report.measurements.alerts_sent
        );

        report
    }

    /// Poll one node against the range policy currently in effect
    pub async fn poll_node(&self, node: &Node) -> Result<MeasurementTally, PollError> {
        let policy = self.ranges.snapshot().await;
        self.poll_node_with(node, &policy).await
    }

    pub async fn poll_node_by_id(&self, id: NodeId) -> Result<MeasurementTally, PollError> {
        let node = self
            .store
            .get_node(id)
            .await?
            .ok_or(PollError::UnknownNode(id))?;
        self.poll_node(&node).await
    }

    #[instrument(skip_all, fields(node = node.id, room = %node.room))]
    async fn poll_node_with(
        &self,
        node: &Node,
        policy: &RangePolicy,
    ) -> Result<MeasurementTally, PollError> {
        let descriptors: Vec<SensorDescriptor> = self
            .store
            .attached_sensors(node.id)
            .await?
            .iter()
            .filter_map(SensorDescriptor::from_sensor)
            .collect();

        if descriptors.is_empty() {
            debug!("no attached sensors, skipping node");
            return Ok(MeasurementTally::default());
        }

        let requested: HashMap<SensorId, DeviceId> =
            descriptors.iter().map(|s| (s.id, s.device)).collect();

        let measurements = self.client.poll(node, descriptors).await?;

        let mut tally = MeasurementTally {
            received: measurements.len(),
            ..Default::default()
        };

        for measurement in measurements {
            if requested.get(&measurement.sensor) != Some(&measurement.device) {
                warn!(
                    "ignoring measurement for unrequested sensor {} / device {}",
                    measurement.sensor, measurement.device
                );
                tally.rejected += 1;
                continue;
            }
            self.process(measurement, policy, &mut tally).await;
        }

        debug!(
            "node answered with {} measurements, {} stored",
            tally.received, tally.stored
        );
        Ok(tally)
    }

    async fn process(
        &self,
        measurement: Measurement,
        policy: &RangePolicy,
        tally: &mut MeasurementTally,
    ) {
        if !policy.accepts(&measurement) {
            trace!(
                "discarding unconfigured parameter {} of device {}",
                measurement.parameter, measurement.device
            );
            tally.discarded += 1;
            return;
        }

        match self.store.insert_measurement(&measurement).await {
            Ok(()) => tally.stored += 1,
            Err(e) if e.is_conflict() => {
                warn!("measurement already stored, skipping: {e}");
                tally.conflicts += 1;
                return;
            }
            Err(e) => {
                error!("failed to store measurement: {e}");
                tally.storage_errors += 1;
                return;
            }
        }

        let verdict = match policy.evaluate(&measurement) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("cannot evaluate stored measurement: {e}");
                tally.evaluation_errors += 1;
                return;
            }
        };

        match verdict {
            Verdict::InRange => trace!("{} within range", measurement.parameter),
            Verdict::Unreadable => {
                warn!(
                    "sensor {} reported no value for {}",
                    measurement.sensor, measurement.parameter
                );
                tally.unreadable += 1;
            }
            Verdict::LowBattery { .. } | Verdict::OutOfRange { .. } => {
                info!("{} out of range: {:?}", measurement.parameter, verdict);
                match self.alerts.alert(&measurement, &verdict).await {
                    Ok(AlertOutcome::Sent { .. }) => tally.alerts_sent += 1,
                    Ok(AlertOutcome::NoRecipients) => tally.alerts_unrouted += 1,
                    Ok(AlertOutcome::NotNeeded) => {}
                    Err(e) => {
                        error!("failed to send alert: {e}");
                        tally.alerts_failed += 1;
                    }
                }
            }
        }
    }
}
