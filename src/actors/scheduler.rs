//! SchedulerActor - drives poll cycles on a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ─┐
//!             ├→ FleetCoordinator::poll_all → CycleReport (kept as last report)
//! PollNow ────┘
//!     ↑
//!     └─── Commands (UpdateInterval, ReloadRanges, LastReport, Shutdown)
//! ```
//!
//! Cycles run inside the actor loop, so at most one is in flight. Ticks that
//! fall due while a cycle is still running are skipped, not queued.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::config::MIN_INTERVAL_SECS;
use crate::coordinator::{CycleReport, FleetCoordinator};

use super::messages::SchedulerCommand;

pub struct SchedulerActor {
    coordinator: FleetCoordinator,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    interval_duration: Duration,

    /// When the first timer-driven cycle runs
    first_tick: Instant,

    last_report: Option<CycleReport>,
}

impl SchedulerActor {
    pub fn new(
        coordinator: FleetCoordinator,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        interval_duration: Duration,
        first_tick: Instant,
    ) -> Self {
        Self {
            coordinator,
            command_rx,
            interval_duration: clamp_interval(interval_duration),
            first_tick,
            last_report: None,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(interval = ?self.interval_duration))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = make_ticker(self.first_tick, self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        SchedulerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let report = self.run_cycle().await;
                            let _ = respond_to.send(report);
                        }

                        SchedulerCommand::UpdateInterval { interval_secs } => {
                            self.interval_duration = clamp_interval(Duration::from_secs(interval_secs));
                            info!("polling interval set to {:?}", self.interval_duration);
                            ticker = ticker_after(self.interval_duration);
                        }

                        SchedulerCommand::ReloadRanges { respond_to } => {
                            debug!("received ReloadRanges command");
                            let result = self.coordinator.reload_ranges().await;
                            if let Err(e) = &result {
                                warn!("failed to reload ranges, keeping previous policy: {e}");
                            }
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::LastReport { respond_to } => {
                            let _ = respond_to.send(self.last_report.clone());
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    async fn run_cycle(&mut self) -> CycleReport {
        let report = self.coordinator.poll_all().await;
        self.last_report = Some(report.clone());
        report
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    let min = Duration::from_secs(MIN_INTERVAL_SECS);
    if interval < min {
        warn!("interval of {interval:?} is below the minimum, using {min:?}");
        return min;
    }
    interval
}

fn make_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn ticker_after(period: Duration) -> Interval {
    make_ticker(Instant::now() + period, period)
}

/// Handle for controlling a SchedulerActor
///
/// Cloneable; the actor stops once the last handle is dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a scheduler whose first cycle starts right away
    pub fn spawn(coordinator: FleetCoordinator, interval: Duration) -> Self {
        Self::spawn_at(coordinator, interval, Instant::now())
    }

    /// Spawn a scheduler whose first timer-driven cycle starts at `first_tick`
    pub fn spawn_at(coordinator: FleetCoordinator, interval: Duration, first_tick: Instant) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(coordinator, cmd_rx, interval, first_tick);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a cycle now and wait for its report
    pub async fn poll_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive cycle report")
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Reload ranges from storage; returns the number of ranges in effect
    pub async fn reload_ranges(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ReloadRanges { respond_to: tx })
            .await
            .context("failed to send ReloadRanges command")?;

        let count = rx.await.context("failed to receive response")??;
        Ok(count)
    }

    pub async fn last_report(&self) -> Result<Option<CycleReport>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::LastReport { respond_to: tx })
            .await
            .context("failed to send LastReport command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
