//! Paced replay of one archived event.
//!
//! The pipeline drives a [`ChunkFetcher`] to the end of its source, forwards
//! each reconstructed snapshot to the sink, and sleeps after every batch so
//! that `k` snapshots take `k * 1000 / speed` milliseconds. Cancellation is
//! observed before each snapshot and during the pacing sleep.
//!
//! With a sink, the source's car data is published right after registration
//! when the recording is recent enough to have it, and speedmap records are
//! published ahead of the first snapshot that is newer than them. Records
//! newer than the last snapshot are not published.

use crate::archive::ArchiveService;
use crate::fetcher::ChunkFetcher;
use crate::sink::{PublishSink, StreamAnnouncement};
use crate::speedmap::SpeedmapFeed;
use racelog_core::{CoreResult, EventDescriptor, StressConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counters reported by a finished or cancelled replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    /// Archive calls made, including the final empty page
    pub fetch_count: usize,
    /// Snapshots forwarded
    pub frame_count: usize,
    /// Speedmap records published
    pub speedmap_count: usize,
    /// Whether a car data document was published
    pub car_data_published: bool,
    /// Wall time of the replay
    pub elapsed: Duration,
    /// Whether the replay stopped on cancellation
    pub cancelled: bool,
}

/// Replay of a single source event onto an optional sink
pub struct ReplayPipeline {
    fetcher: ChunkFetcher,
    speedmaps: SpeedmapFeed,
    archive: Arc<dyn ArchiveService>,
    sink: Option<Arc<dyn PublishSink>>,
    announcement: StreamAnnouncement,
    car_data: bool,
    config: Arc<StressConfig>,
}

impl ReplayPipeline {
    /// Create a pipeline for `event`.
    ///
    /// Without a sink the snapshots are reconstructed and paced but not
    /// published anywhere, and no side channel is fetched.
    #[must_use]
    pub fn new(
        config: Arc<StressConfig>,
        archive: Arc<dyn ArchiveService>,
        sink: Option<Arc<dyn PublishSink>>,
        event: &EventDescriptor,
    ) -> Self {
        Self {
            fetcher: ChunkFetcher::for_event(archive.clone(), event, config.batch_size),
            speedmaps: SpeedmapFeed::for_event(archive.clone(), event),
            archive,
            sink,
            announcement: StreamAnnouncement::for_event(event, config.event_key.as_deref()),
            car_data: event.has_car_data(),
            config,
        }
    }

    /// Announcement the stream is registered with
    #[must_use]
    pub fn announcement(&self) -> &StreamAnnouncement {
        &self.announcement
    }

    /// Replay the source to its end or until `cancel` fires.
    ///
    /// The stream is unregistered on every exit path once registration was
    /// attempted. A cancelled replay is not an error; its outcome carries the
    /// counts reached so far.
    ///
    /// # Errors
    ///
    /// Returns the first archive, decode or sink error
    pub async fn run(mut self, cancel: &CancellationToken) -> CoreResult<ReplayOutcome> {
        let started = Instant::now();
        let mut outcome = ReplayOutcome::default();

        let result = match self.sink.clone() {
            Some(sink) => {
                let streamed = match sink.register(&self.announcement).await {
                    Ok(()) => {
                        debug!(key = %self.announcement.key, source = %self.announcement.source, "registered stream");
                        match self.publish_car_data(sink.as_ref(), &mut outcome).await {
                            Ok(()) => self.stream(Some(sink.as_ref()), cancel, &mut outcome).await,
                            Err(err) => Err(err),
                        }
                    }
                    Err(err) => Err(err),
                };
                let unregistered = sink.unregister(&self.announcement.key).await;
                match (streamed, unregistered) {
                    (Err(err), Err(cleanup)) => {
                        warn!(key = %self.announcement.key, error = %cleanup, "unregister after failure");
                        Err(err)
                    }
                    (Err(err), Ok(())) => Err(err),
                    (Ok(()), unregistered) => unregistered,
                }
            }
            None => self.stream(None, cancel, &mut outcome).await,
        };

        outcome.fetch_count = self.fetcher.fetch_count();
        outcome.elapsed = started.elapsed();
        result.map(|()| outcome)
    }

    async fn publish_car_data(
        &self,
        sink: &dyn PublishSink,
        outcome: &mut ReplayOutcome,
    ) -> CoreResult<()> {
        if !self.car_data {
            return Ok(());
        }
        let source = self.announcement.source;
        match self.archive.fetch_car_data(source).await? {
            Some(car_data) => {
                sink.publish_car_data(&self.announcement.key, &car_data).await?;
                outcome.car_data_published = true;
            }
            None => debug!(source = %source, "no car data archived"),
        }
        Ok(())
    }

    async fn stream(
        &mut self,
        sink: Option<&dyn PublishSink>,
        cancel: &CancellationToken,
        outcome: &mut ReplayOutcome,
    ) -> CoreResult<()> {
        let key = &self.announcement.key;

        while let Some(batch) = self.fetcher.next_batch().await? {
            let batch_len = batch.len();
            for snapshot in &batch {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    return Ok(());
                }
                if let Some(sink) = sink {
                    for record in self.speedmaps.take_before(snapshot.timestamp).await? {
                        sink.publish_speedmap(key, &record).await?;
                        outcome.speedmap_count += 1;
                    }
                    sink.publish(key, snapshot).await?;
                }
                outcome.frame_count += 1;
            }

            let delay = self.config.batch_delay(batch_len);
            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        outcome.cancelled = true;
                        return Ok(());
                    }
                }
            }
        }

        debug!(
            source = %self.fetcher.source(),
            frames = outcome.frame_count,
            speedmaps = outcome.speedmap_count,
            fetches = self.fetcher.fetch_count(),
            "replay finished"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ReplayPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayPipeline")
            .field("fetcher", &self.fetcher)
            .field("has_sink", &self.sink.is_some())
            .field("key", &self.announcement.key)
            .finish_non_exhaustive()
    }
}
