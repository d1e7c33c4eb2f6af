//! Job issuing and the shared job queue.
//!
//! [`JobFactory`] turns the eligible pool into jobs by independent random
//! picks. [`JobQueue`] hands them to whichever worker asks first; in fixed
//! mode it is sealed once the last job has been queued, so idle workers exit
//! instead of waiting forever.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use racelog_core::{EventDescriptor, JobId, WorkerId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// One replay of one source event
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Issue-order id
    pub id: JobId,
    /// Event to replay
    pub source: EventDescriptor,
    /// Worker running the job, once taken
    pub worker: Option<WorkerId>,
}

impl Job {
    /// Mark the job as taken by `worker`
    #[must_use]
    pub fn assign(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }
}

/// Issues jobs by picking uniformly from the eligible pool
#[derive(Debug)]
pub struct JobFactory {
    pool: Vec<EventDescriptor>,
    rng: Mutex<ChaCha8Rng>,
    next_id: AtomicU64,
    remaining: Option<AtomicUsize>,
}

impl JobFactory {
    /// Create a factory over a non-empty pool.
    ///
    /// `limit` caps the total number of jobs; `None` issues without bound.
    #[must_use]
    pub fn new(pool: Vec<EventDescriptor>, seed: Option<u64>, limit: Option<usize>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            pool,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            next_id: AtomicU64::new(1),
            remaining: limit.map(AtomicUsize::new),
        }
    }

    /// Issue the next job, or `None` when the pool is empty or the limit is spent
    pub fn issue(&self) -> Option<Job> {
        if self.pool.is_empty() {
            return None;
        }
        if let Some(remaining) = &self.remaining {
            remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()?;
        }

        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(0..self.pool.len())
        };
        let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst));

        Some(Job {
            id,
            source: self.pool[index].clone(),
            worker: None,
        })
    }

    /// Whether no further job will be issued
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pool.is_empty()
            || self
                .remaining
                .as_ref()
                .is_some_and(|remaining| remaining.load(Ordering::SeqCst) == 0)
    }

    /// Number of jobs issued so far
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    /// Size of the eligible pool
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }
}

/// Multi-producer, multi-consumer job queue
#[derive(Debug, Clone)]
pub struct JobQueue {
    factory: Arc<JobFactory>,
    tx: mpsc::UnboundedSender<Job>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    sealed: CancellationToken,
}

impl JobQueue {
    /// Create an empty queue fed by `factory`
    #[must_use]
    pub fn new(factory: Arc<JobFactory>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            factory,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            sealed: CancellationToken::new(),
        }
    }

    /// Issue one job from the factory and queue it.
    ///
    /// Returns `false` when the factory is exhausted. The queue is sealed as
    /// soon as the last job has been queued.
    pub fn request(&self) -> bool {
        let queued = match self.factory.issue() {
            Some(job) => {
                trace!(job = %job.id, source = %job.source.id, "queued job");
                self.tx.send(job).is_ok()
            }
            None => false,
        };
        if self.factory.is_exhausted() {
            self.sealed.cancel();
        }
        queued
    }

    /// Take the next job.
    ///
    /// Waits for a job to arrive; returns `None` once `cancel` fires, or once
    /// the queue is sealed and empty.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<Job> {
        let mut rx = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };

        loop {
            if let Ok(job) = rx.try_recv() {
                return Some(job);
            }
            if self.sealed.is_cancelled() {
                return None;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                job = rx.recv() => return job,
                () = self.sealed.cancelled() => {}
            }
        }
    }

    /// Whether no further job will be queued
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_cancelled()
    }

    /// Resolves once no further job will be queued
    pub async fn sealed(&self) {
        self.sealed.cancelled().await;
    }

    /// The factory feeding this queue
    #[must_use]
    pub fn factory(&self) -> &JobFactory {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelog_core::EventId;
    use std::collections::HashSet;

    fn pool(size: i64) -> Vec<EventDescriptor> {
        (1..=size)
            .map(|id| EventDescriptor::new(EventId::new(id), format!("event {}", id)))
            .collect()
    }

    #[test]
    fn test_job_ids_start_at_one() {
        let factory = JobFactory::new(pool(3), Some(7), None);
        let ids: Vec<u64> = (0..4).map(|_| factory.issue().unwrap().id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(factory.issued(), 4);
        assert!(!factory.is_exhausted());
    }

    #[test]
    fn test_seeded_picks_are_reproducible() {
        let picks = |seed| {
            let factory = JobFactory::new(pool(10), Some(seed), None);
            (0..20)
                .map(|_| factory.issue().unwrap().source.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn test_picks_cover_pool() {
        let factory = JobFactory::new(pool(3), Some(1), None);
        let seen: HashSet<EventId> = (0..200).map(|_| factory.issue().unwrap().source.id).collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_limit_is_respected() {
        let factory = JobFactory::new(pool(2), Some(1), Some(3));
        assert!(factory.issue().is_some());
        assert!(factory.issue().is_some());
        assert!(factory.issue().is_some());
        assert!(factory.issue().is_none());
        assert!(factory.is_exhausted());
        assert_eq!(factory.issued(), 3);
    }

    #[test]
    fn test_empty_pool_issues_nothing() {
        let factory = JobFactory::new(Vec::new(), None, None);
        assert!(factory.issue().is_none());
        assert!(factory.is_exhausted());
    }

    #[tokio::test]
    async fn test_queue_hands_out_requested_jobs() {
        let queue = JobQueue::new(Arc::new(JobFactory::new(pool(4), Some(3), None)));
        assert!(queue.request());
        assert!(queue.request());

        let cancel = CancellationToken::new();
        let first = queue.take(&cancel).await.unwrap();
        let second = queue.take(&cancel).await.unwrap();
        assert_eq!(first.id, JobId::new(1));
        assert_eq!(second.id, JobId::new(2));
        assert!(first.worker.is_none());
        assert_eq!(first.assign(WorkerId::new(5)).worker, Some(WorkerId::new(5)));
    }

    #[tokio::test]
    async fn test_take_returns_none_on_cancel() {
        let queue = JobQueue::new(Arc::new(JobFactory::new(pool(1), None, None)));
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.take(&cancel).await })
        };

        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sealed_queue_drains_then_ends() {
        let queue = JobQueue::new(Arc::new(JobFactory::new(pool(2), Some(1), Some(2))));
        assert!(queue.request());
        assert!(!queue.is_sealed());
        assert!(queue.request());
        assert!(queue.is_sealed());
        assert!(!queue.request());

        let cancel = CancellationToken::new();
        assert!(queue.take(&cancel).await.is_some());
        assert!(queue.take(&cancel).await.is_some());
        assert!(queue.take(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_waiting_worker_wakes_on_seal() {
        let queue = JobQueue::new(Arc::new(JobFactory::new(pool(1), Some(1), Some(1))));
        let cancel = CancellationToken::new();
        assert!(queue.request());
        assert!(queue.take(&cancel).await.is_some());

        // Queue is sealed and empty
        assert!(queue.take(&cancel).await.is_none());
    }
}
