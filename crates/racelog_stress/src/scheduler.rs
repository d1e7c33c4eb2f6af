//! Workload scheduler.
//!
//! A run moves through `Seeding -> Running -> Draining -> Done`:
//!
//! - **Seeding** lists the archive, filters the eligible pool and queues one
//!   job per worker. An empty pool fails the run here.
//! - **Running** spawns the workers and, in timed mode, a timer that cancels
//!   the run once the test duration has elapsed.
//! - **Draining** starts when the timer fires (timed mode) or the last job
//!   has been queued (fixed mode). No new jobs are issued.
//! - **Done** is reached once every worker has been joined and the
//!   aggregator has produced the report.

use crate::eligibility::eligible_events;
use crate::queue::{JobFactory, JobQueue};
use crate::report::StatsReport;
use crate::stats::{JobResult, StatsAggregator};
use crate::worker::{Worker, WorkerReport};
use racelog_core::{CoreError, CoreResult, RunMode, StressConfig, WorkerId};
use racelog_replay::{ArchiveService, PublishSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerPhase {
    /// Selecting source events and queueing the first jobs
    Seeding,
    /// Workers are replaying and replenishing jobs
    Running,
    /// No new jobs; workers finish their current one
    Draining,
    /// All workers joined
    Done,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Aggregated statistics
    pub report: StatsReport,
    /// Jobs taken by workers
    pub jobs_started: usize,
    /// Jobs that produced a result
    pub jobs_completed: usize,
    /// Jobs aborted by an error
    pub jobs_failed: usize,
    /// Time from the first worker starting to the last one exiting
    pub wall_time: Duration,
}

/// Runs `W` concurrent replay workers over the eligible pool
pub struct WorkloadScheduler {
    config: Arc<StressConfig>,
    archive: Arc<dyn ArchiveService>,
    sink: Option<Arc<dyn PublishSink>>,
    cancel: CancellationToken,
    phase: watch::Sender<SchedulerPhase>,
}

impl WorkloadScheduler {
    /// Create a scheduler; without a sink, replays are not published
    #[must_use]
    pub fn new(
        config: StressConfig,
        archive: Arc<dyn ArchiveService>,
        sink: Option<Arc<dyn PublishSink>>,
    ) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Seeding);
        Self {
            config: Arc::new(config),
            archive,
            sink,
            cancel: CancellationToken::new(),
            phase,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    /// Token that drains the run when cancelled
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration of this run
    #[must_use]
    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    fn enter(&self, phase: SchedulerPhase) {
        self.phase.send_if_modified(|current| {
            // Phases only move forward
            let advance = rank(phase) > rank(*current);
            if advance {
                *current = phase;
            }
            advance
        });
    }

    /// Execute the run to completion.
    ///
    /// A failing job never fails the run; it is logged and counted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for a rejected configuration,
    /// the archive error if listing events fails, and
    /// `CoreError::NoEligibleEvents` if nothing passes the filter
    pub async fn run(&self) -> CoreResult<RunSummary> {
        let seeded = self.seed().await;
        let queue = match seeded {
            Ok(queue) => queue,
            Err(err) => {
                self.enter(SchedulerPhase::Done);
                return Err(err);
            }
        };

        let mode = self.config.mode();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let aggregator = tokio::spawn(aggregate(results_rx));

        self.enter(SchedulerPhase::Running);
        let started = Instant::now();
        info!(
            workers = self.config.worker_count,
            mode = mode.label(),
            speed = self.config.replay_speed,
            "stress run started"
        );

        let workers: Vec<_> = (1..=self.config.worker_count)
            .map(|id| {
                let worker = Worker::new(
                    WorkerId::new(id),
                    self.config.clone(),
                    self.archive.clone(),
                    self.sink.clone(),
                    queue.clone(),
                    results_tx.clone(),
                    self.cancel.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();
        drop(results_tx);

        let drain = self.drain_trigger(mode, queue.clone());
        let joined = futures::future::join_all(workers).await;
        let wall_time = started.elapsed();
        self.enter(SchedulerPhase::Draining);

        // Stop the timer if the workers finished before it fired
        self.cancel.cancel();
        if let Err(err) = drain.await {
            error!(error = %err, "drain trigger task aborted");
        }

        let mut totals = WorkerReport::default();
        for outcome in joined {
            match outcome {
                Ok(report) => {
                    totals.started += report.started;
                    totals.completed += report.completed;
                    totals.failed += report.failed;
                }
                Err(err) => error!(error = %err, "worker task aborted"),
            }
        }

        let aggregator = aggregator.await.map_err(|err| CoreError::Internal {
            message: format!("aggregator task: {}", err),
        })?;
        if aggregator.cancelled() > 0 {
            info!(jobs = aggregator.cancelled(), "jobs cut short by the end of the run");
        }
        let report = aggregator.finalize();
        self.enter(SchedulerPhase::Done);

        info!(
            started = totals.started,
            completed = totals.completed,
            failed = totals.failed,
            wall_time = ?wall_time,
            "stress run finished"
        );
        Ok(RunSummary {
            report,
            jobs_started: totals.started,
            jobs_completed: totals.completed,
            jobs_failed: totals.failed,
            wall_time,
        })
    }

    async fn seed(&self) -> CoreResult<JobQueue> {
        self.config.validate()?;

        let events = self.archive.list_events().await?;
        let pool = eligible_events(&events, &self.config)?;
        if pool.is_empty() {
            warn!(total = events.len(), "no eligible source events");
            return Err(CoreError::NoEligibleEvents {
                total: events.len(),
            });
        }
        info!(total = events.len(), eligible = pool.len(), "selected source events");

        let factory = JobFactory::new(pool, self.config.seed, self.config.run_limit);
        let queue = JobQueue::new(Arc::new(factory));
        for _ in 0..self.config.worker_count {
            if !queue.request() {
                break;
            }
        }
        Ok(queue)
    }

    fn drain_trigger(&self, mode: RunMode, queue: JobQueue) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        let phase = self.phase.clone();
        let to_draining = move || {
            phase.send_if_modified(|current| {
                let advance = *current == SchedulerPhase::Running;
                if advance {
                    *current = SchedulerPhase::Draining;
                }
                advance
            });
        };

        match mode {
            RunMode::Timed { duration } => tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(duration) => {
                        info!(duration = ?duration, "test duration elapsed, draining");
                        to_draining();
                        cancel.cancel();
                    }
                    () = cancel.cancelled() => {}
                }
            }),
            RunMode::Fixed { .. } => tokio::spawn(async move {
                tokio::select! {
                    () = queue.sealed() => {
                        info!("all jobs issued, draining");
                        to_draining();
                    }
                    () = cancel.cancelled() => {}
                }
            }),
        }
    }
}

impl std::fmt::Debug for WorkloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadScheduler")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

const fn rank(phase: SchedulerPhase) -> u8 {
    match phase {
        SchedulerPhase::Seeding => 0,
        SchedulerPhase::Running => 1,
        SchedulerPhase::Draining => 2,
        SchedulerPhase::Done => 3,
    }
}

async fn aggregate(mut results: mpsc::UnboundedReceiver<JobResult>) -> StatsAggregator {
    let mut aggregator = StatsAggregator::new();
    while let Some(result) = results.recv().await {
        aggregator.record(&result);
    }
    aggregator
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelog_core::{EventDescriptor, EventId, Frame, Payload};
    use serde_json::json;
    use racelog_sim::{FlakyArchive, MemoryArchive, RecordingSink, SimSeed};

    fn archive(events: usize, frames: usize) -> Arc<MemoryArchive> {
        Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(11), events, frames))
    }

    fn assert_conserved(summary: &RunSummary) {
        let by_event: usize = summary.report.events.iter().map(|s| s.num_states).sum();
        let by_worker: usize = summary.report.workers.iter().map(|s| s.num_states).sum();
        assert_eq!(by_event, by_worker);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fixed_run_completes_every_job() {
        let config = StressConfig::new()
            .with_workers(3)
            .with_speed(0)
            .with_run_limit(7)
            .with_seed(5);
        let sink = Arc::new(RecordingSink::new());
        let scheduler = WorkloadScheduler::new(config, archive(4, 20), Some(sink.clone()));

        let summary = scheduler.run().await.unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Done);
        assert_eq!(summary.jobs_started, 7);
        assert_eq!(summary.jobs_completed, 7);
        assert_eq!(summary.jobs_failed, 0);
        assert_eq!(summary.report.total_jobs(), 7);
        assert_eq!(summary.report.total_states(), 7 * 20);
        assert_eq!(sink.registered().len(), 7);
        assert_eq!(sink.car_data().len(), 7);
        assert_conserved(&summary);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fewer_runs_than_workers() {
        let config = StressConfig::new()
            .with_workers(4)
            .with_speed(0)
            .with_run_limit(2);
        let scheduler = WorkloadScheduler::new(config, archive(2, 5), None);

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.jobs_completed, 2);
        assert!(summary.report.workers.len() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_run_drains_on_timer() {
        // 10 frames at speed 1 take 10s per job; the timer fires first
        let config = StressConfig::new()
            .with_workers(2)
            .with_speed(1)
            .with_batch_size(5)
            .with_test_duration(Duration::from_secs(3));
        let scheduler = WorkloadScheduler::new(config, archive(3, 10), None);
        let mut phases = scheduler.subscribe();

        let summary = scheduler.run().await.unwrap();
        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), SchedulerPhase::Done);

        assert_eq!(summary.jobs_started, 2);
        assert_eq!(summary.jobs_completed, 2);
        assert_eq!(summary.report.total_states(), 2 * 5);
        assert!(summary.wall_time >= Duration::from_secs(3));
        assert!(summary.wall_time < Duration::from_secs(4));
        assert_conserved(&summary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_run_replenishes_jobs() {
        // 4 frames at speed 2 take 2s per job
        let config = StressConfig::new()
            .with_workers(1)
            .with_speed(2)
            .with_test_duration(Duration::from_secs(7));
        let scheduler = WorkloadScheduler::new(config, archive(2, 4), None);

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.jobs_started, 4);
        assert_eq!(summary.report.total_states(), 4 * 4);
    }

    #[tokio::test]
    async fn test_no_eligible_events_fails_fast() {
        let config = StressConfig::new().with_min_session_minutes(100_000);
        let scheduler = WorkloadScheduler::new(config, archive(3, 5), None);

        let err = scheduler.run().await.unwrap_err();
        assert_eq!(err, CoreError::NoEligibleEvents { total: 3 });
        assert_eq!(scheduler.phase(), SchedulerPhase::Done);
    }

    #[tokio::test]
    async fn test_old_events_are_excluded() {
        let old = EventDescriptor::new(EventId::new(1), "old")
            .with_session_times(0.0, 3600.0)
            .with_version("0.4.0");
        let archive = Arc::new(MemoryArchive::new().with_event(old, Vec::new()));
        let scheduler = WorkloadScheduler::new(StressConfig::new(), archive, None);

        assert!(matches!(
            scheduler.run().await,
            Err(CoreError::NoEligibleEvents { total: 1 })
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let scheduler = WorkloadScheduler::new(StressConfig::new().with_workers(0), archive(1, 1), None);
        assert!(matches!(
            scheduler.run().await,
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_failures_do_not_stop_the_run() {
        let flaky = Arc::new(FlakyArchive::new(archive(2, 6)).failing_calls([1, 4]));
        let config = StressConfig::new()
            .with_workers(2)
            .with_speed(0)
            .with_run_limit(6)
            .with_seed(3);
        let scheduler = WorkloadScheduler::new(config, flaky, None);

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.jobs_started, 6);
        assert_eq!(summary.jobs_failed + summary.jobs_completed, 6);
        assert!(summary.jobs_failed >= 1);
        assert_eq!(summary.report.total_jobs(), summary.jobs_completed);
        assert_conserved(&summary);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_undecodable_frames_count_as_failed_jobs() {
        let event = EventDescriptor::new(EventId::new(1), "corrupt")
            .with_session_times(0.0, 3600.0)
            .with_version("0.7.0");
        let corrupt = Frame::from_json(json!({
            "type": 8,
            "timestamp": 1.0,
            "payload": {"session": [[1e19, 1]]}
        }))
        .unwrap();
        let frames = vec![Frame::full(0.0, Payload::default()), corrupt];
        let archive = Arc::new(MemoryArchive::new().with_event(event, frames));
        let config = StressConfig::new()
            .with_workers(1)
            .with_speed(0)
            .with_run_limit(3);
        let scheduler = WorkloadScheduler::new(config, archive, None);

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.jobs_started, 3);
        assert_eq!(summary.jobs_failed, 3);
        assert_eq!(summary.jobs_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_drains() {
        let config = StressConfig::new()
            .with_workers(2)
            .with_speed(1)
            .with_test_duration(Duration::from_secs(3600));
        let scheduler = WorkloadScheduler::new(config, archive(2, 50), None);
        let cancel = scheduler.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let summary = scheduler.run().await.unwrap();
        assert_eq!(summary.jobs_started, 2);
        assert!(summary.wall_time < Duration::from_secs(3600));
    }
}
