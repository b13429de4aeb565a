//! Actor that drives the hub
//!
//! The scheduler runs as an independent async task and is controlled through
//! a cloneable handle over a Tokio mpsc channel.
//!
//! ```text
//!   hub main ──spawns──▶ SchedulerActor ──every interval──▶ FleetCoordinator::poll_all
//!       │                      ▲
//!       └── SchedulerHandle ───┘ (PollNow, UpdateInterval, ReloadRanges, LastReport, Shutdown)
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: fire-and-forget control messages over mpsc
//! 2. **Request/Response**: oneshot channels for answers (cycle reports, reload counts)

pub mod messages;
pub mod scheduler;
