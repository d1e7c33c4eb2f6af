//! Paginated speedmap records.
//!
//! [`SpeedmapFeed`] pages speedmap records from the archive with the same
//! cursor rule as [`ChunkFetcher`](crate::ChunkFetcher) and hands them out in
//! timestamp order, so a replay can merge them into its snapshot stream.

use crate::archive::ArchiveService;
use crate::fetcher::CURSOR_EPSILON;
use racelog_core::{CoreResult, EventDescriptor, EventId, SpeedmapRecord};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Speedmap records requested per archive page
pub const SPEEDMAP_BATCH_SIZE: usize = 30;

/// Lazy, paginated speedmap source for one archived event
pub struct SpeedmapFeed {
    archive: Arc<dyn ArchiveService>,
    source: EventId,
    cursor: f64,
    batch_size: usize,
    pending: VecDeque<SpeedmapRecord>,
    fetch_count: usize,
    exhausted: bool,
}

impl SpeedmapFeed {
    /// Create a feed starting at `start`
    #[must_use]
    pub fn new(
        archive: Arc<dyn ArchiveService>,
        source: EventId,
        start: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            archive,
            source,
            cursor: start,
            batch_size,
            pending: VecDeque::new(),
            fetch_count: 0,
            exhausted: false,
        }
    }

    /// Create a feed starting at the event's replay start
    #[must_use]
    pub fn for_event(archive: Arc<dyn ArchiveService>, event: &EventDescriptor) -> Self {
        Self::new(archive, event.id, event.replay_start(), SPEEDMAP_BATCH_SIZE)
    }

    /// Take every record strictly older than `timestamp`, in order.
    ///
    /// Pages are only fetched once the buffered records are used up, so the
    /// archive is asked at most once more than needed.
    ///
    /// # Errors
    ///
    /// Returns the archive error of a failed page
    pub async fn take_before(&mut self, timestamp: f64) -> CoreResult<Vec<SpeedmapRecord>> {
        let mut due = Vec::new();
        loop {
            while let Some(front) = self.pending.front() {
                if front.timestamp >= timestamp {
                    return Ok(due);
                }
                due.extend(self.pending.pop_front());
            }
            if self.exhausted {
                return Ok(due);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> CoreResult<()> {
        let page = self
            .archive
            .fetch_speedmaps(self.source, self.cursor, self.batch_size)
            .await?;
        self.fetch_count += 1;

        match page.last() {
            Some(last) => self.cursor = last.timestamp + CURSOR_EPSILON,
            None => self.exhausted = true,
        }
        trace!(source = %self.source, records = page.len(), cursor = self.cursor, "speedmap page");
        self.pending.extend(page);
        Ok(())
    }

    /// Archive calls made so far
    #[must_use]
    pub const fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Whether the archive has no further records
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl std::fmt::Debug for SpeedmapFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedmapFeed")
            .field("source", &self.source)
            .field("cursor", &self.cursor)
            .field("pending", &self.pending.len())
            .field("fetch_count", &self.fetch_count)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use racelog_core::Frame;
    use serde_json::json;
    use std::sync::Mutex;

    struct SpeedmapArchive {
        records: Vec<SpeedmapRecord>,
        calls: Mutex<Vec<f64>>,
    }

    impl SpeedmapArchive {
        fn new(timestamps: &[f64]) -> Self {
            Self {
                records: timestamps
                    .iter()
                    .map(|ts| SpeedmapRecord::new(*ts, json!({"at": ts})))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ArchiveService for SpeedmapArchive {
        async fn fetch_frames(
            &self,
            _source: EventId,
            _from: f64,
            _max_count: usize,
        ) -> CoreResult<Vec<Frame>> {
            Ok(Vec::new())
        }

        async fn list_events(&self) -> CoreResult<Vec<EventDescriptor>> {
            Ok(Vec::new())
        }

        async fn fetch_speedmaps(
            &self,
            _source: EventId,
            from: f64,
            max_count: usize,
        ) -> CoreResult<Vec<SpeedmapRecord>> {
            self.calls.lock().unwrap().push(from);
            Ok(self
                .records
                .iter()
                .filter(|r| r.timestamp >= from)
                .take(max_count)
                .cloned()
                .collect())
        }
    }

    fn timestamps(records: &[SpeedmapRecord]) -> Vec<f64> {
        records.iter().map(|r| r.timestamp).collect()
    }

    #[tokio::test]
    async fn test_take_before_pages_across_boundaries() {
        let archive = Arc::new(SpeedmapArchive::new(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        let mut feed = SpeedmapFeed::new(archive.clone(), EventId::new(1), 0.0, 2);

        assert!(feed.take_before(0.5).await.unwrap().is_empty());
        assert_eq!(timestamps(&feed.take_before(3.5).await.unwrap()), vec![1.0, 2.0, 3.0]);
        assert_eq!(timestamps(&feed.take_before(3.6).await.unwrap()), Vec::<f64>::new());
        assert_eq!(timestamps(&feed.take_before(100.0).await.unwrap()), vec![4.0, 5.0]);
        assert!(feed.is_exhausted());

        let calls = archive.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![0.0, 2.0 + CURSOR_EPSILON, 4.0 + CURSOR_EPSILON, 5.0 + CURSOR_EPSILON]);
        assert_eq!(feed.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_equal_timestamp_is_not_due() {
        let archive = Arc::new(SpeedmapArchive::new(&[2.0]));
        let mut feed = SpeedmapFeed::new(archive, EventId::new(1), 0.0, 10);

        assert!(feed.take_before(2.0).await.unwrap().is_empty());
        assert_eq!(timestamps(&feed.take_before(2.1).await.unwrap()), vec![2.0]);
    }

    #[tokio::test]
    async fn test_no_records_stops_after_one_call() {
        let archive = Arc::new(SpeedmapArchive::new(&[]));
        let mut feed = SpeedmapFeed::new(archive.clone(), EventId::new(1), 0.0, 10);

        assert!(feed.take_before(10.0).await.unwrap().is_empty());
        assert!(feed.take_before(20.0).await.unwrap().is_empty());
        assert_eq!(archive.calls.lock().unwrap().len(), 1);
    }
}
