//! Racelog Stress Workload
//!
//! Picks eligible archived events, replays them concurrently on a pool of
//! workers for a fixed duration or a fixed number of runs, and aggregates
//! per-event and per-worker duration statistics.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod eligibility;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use eligibility::{eligible_events, is_min_session_length, meets_min_version, within_race_limit};
pub use queue::{Job, JobFactory, JobQueue};
pub use report::{StatsReport, Summary};
pub use scheduler::{RunSummary, SchedulerPhase, WorkloadScheduler};
pub use stats::{DurationStats, GroupStats, JobResult, StatsAggregator};
pub use worker::{Worker, WorkerReport};
