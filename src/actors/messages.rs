//! Message types for the scheduler actor
//!
//! Commands travel over an mpsc channel; anything that needs an answer carries
//! a oneshot sender for it.

use tokio::sync::oneshot;

use crate::coordinator::CycleReport;
use crate::storage::StorageResult;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a poll cycle now, outside the timer
    ///
    /// Queued behind a cycle that is already running, never run alongside it.
    PollNow {
        respond_to: oneshot::Sender<CycleReport>,
    },

    /// Change the polling interval
    ///
    /// Values below the minimum interval are raised to it. The next cycle is
    /// due one full new interval after the command is handled.
    UpdateInterval { interval_secs: u64 },

    /// Re-read the range table from storage without polling
    ReloadRanges {
        /// Number of ranges now in effect
        respond_to: oneshot::Sender<StorageResult<usize>>,
    },

    /// Report of the most recent completed cycle
    LastReport {
        respond_to: oneshot::Sender<Option<CycleReport>>,
    },

    /// Stop the scheduler
    ///
    /// A cycle in progress is finished first.
    Shutdown,
}
