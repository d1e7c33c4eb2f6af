//! Stress worker loop.

use crate::queue::JobQueue;
use crate::stats::JobResult;
use racelog_core::{StressConfig, WorkerId};
use racelog_replay::{ArchiveService, PublishSink, ReplayPipeline};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Per-worker job counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerReport {
    /// Worker id
    pub worker: Option<WorkerId>,
    /// Jobs taken from the queue
    pub started: usize,
    /// Jobs that produced a result
    pub completed: usize,
    /// Jobs aborted by an error
    pub failed: usize,
}

/// One of the `W` concurrent replay workers.
///
/// Takes a job, replays it, reports the result and asks for a replacement,
/// until the queue ends or the run is cancelled.
pub struct Worker {
    id: WorkerId,
    config: Arc<StressConfig>,
    archive: Arc<dyn ArchiveService>,
    sink: Option<Arc<dyn PublishSink>>,
    queue: JobQueue,
    results: mpsc::UnboundedSender<JobResult>,
    cancel: CancellationToken,
}

impl Worker {
    /// Create a worker
    #[must_use]
    pub fn new(
        id: WorkerId,
        config: Arc<StressConfig>,
        archive: Arc<dyn ArchiveService>,
        sink: Option<Arc<dyn PublishSink>>,
        queue: JobQueue,
        results: mpsc::UnboundedSender<JobResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            config,
            archive,
            sink,
            queue,
            results,
            cancel,
        }
    }

    /// Run jobs until the queue ends or the run is cancelled
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: Some(self.id),
            ..WorkerReport::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(job) = self.queue.take(&self.cancel).await else {
                break;
            };
            let job = job.assign(self.id);
            report.started += 1;
            debug!(worker = %self.id, job = %job.id, source = %job.source.overview(), "starting job");

            let pipeline = ReplayPipeline::new(
                self.config.clone(),
                self.archive.clone(),
                self.sink.clone(),
                &job.source,
            );
            match pipeline.run(&self.cancel).await {
                Ok(outcome) => {
                    report.completed += 1;
                    info!(
                        worker = %self.id,
                        job = %job.id,
                        source = %job.source.id,
                        frames = outcome.frame_count,
                        fetches = outcome.fetch_count,
                        speedmaps = outcome.speedmap_count,
                        elapsed = ?outcome.elapsed,
                        cancelled = outcome.cancelled,
                        "job finished"
                    );
                    let result = JobResult {
                        job_id: job.id,
                        worker_id: self.id,
                        source: job.source.id,
                        source_name: job.source.name.clone(),
                        duration: outcome.elapsed,
                        fetch_count: outcome.fetch_count,
                        frame_count: outcome.frame_count,
                        cancelled: outcome.cancelled,
                    };
                    if self.results.send(result).is_err() {
                        error!(worker = %self.id, "result channel closed");
                        break;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    error!(worker = %self.id, job = %job.id, source = %job.source.id, error = %err, "job failed");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.queue.request();
        }

        debug!(
            worker = %self.id,
            started = report.started,
            completed = report.completed,
            failed = report.failed,
            "worker exiting"
        );
        report
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobFactory;
    use racelog_core::{EventDescriptor, EventId};
    use racelog_sim::{FlakyArchive, MemoryArchive, RecordingSink, SimSeed};

    fn setup(runs: usize) -> (JobQueue, Arc<StressConfig>) {
        let config = Arc::new(StressConfig::new().with_speed(0).with_run_limit(runs));
        let pool = vec![EventDescriptor::new(EventId::new(1), "synthetic 1")];
        let queue = JobQueue::new(Arc::new(JobFactory::new(pool, Some(1), Some(runs))));
        assert!(queue.request());
        (queue, config)
    }

    #[tokio::test]
    async fn test_worker_runs_until_queue_sealed() {
        let archive: Arc<dyn ArchiveService> =
            Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(3), 1, 12));
        let (queue, config) = setup(3);
        let sink = Arc::new(RecordingSink::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let worker = Worker::new(
            WorkerId::new(1),
            config,
            archive,
            Some(sink.clone()),
            queue,
            tx,
            CancellationToken::new(),
        );
        let report = worker.run().await;

        assert_eq!(report.started, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 0);

        let mut frames = 0;
        while let Ok(result) = rx.try_recv() {
            assert_eq!(result.worker_id, WorkerId::new(1));
            frames += result.frame_count;
        }
        assert_eq!(frames, 36);
        assert_eq!(sink.registered().len(), 3);
        assert_eq!(sink.unregistered().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_job_is_replaced_without_result() {
        let inner: Arc<dyn ArchiveService> =
            Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(3), 1, 5));
        // First archive call of the first job fails
        let archive: Arc<dyn ArchiveService> = Arc::new(FlakyArchive::new(inner).failing_calls([1]));
        let (queue, config) = setup(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = Worker::new(
            WorkerId::new(2),
            config,
            archive,
            None,
            queue,
            tx,
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(report.started, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);

        let result = rx.try_recv().unwrap();
        assert_eq!(result.job_id.as_u64(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_worker_takes_no_job() {
        let archive: Arc<dyn ArchiveService> =
            Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(3), 1, 5));
        let (queue, config) = setup(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = Worker::new(WorkerId::new(1), config, archive, None, queue, tx, cancel)
            .run()
            .await;
        assert_eq!(report.started, 0);
    }
}
