//! Feed synchronization: identity resolution, per-feed orchestration, and
//! the sweep scheduler.
//!
//! The split keeps the interesting logic testable: [`resolver`] is pure
//! (snapshots in, plan out), [`orchestrator`] owns one feed's cycle and its
//! failure accounting, [`scheduler`] fans out over due feeds.

pub mod orchestrator;
pub mod resolver;
pub mod scheduler;

pub use orchestrator::{sync_feed, ChangeEvent, SyncOptions, SyncOutcome, SyncStatus};
pub use resolver::{resolve, ResolutionPlan};
pub use scheduler::{run_loop, run_maintenance, sweep, SweepSummary};
