//! Paginated frame fetching.
//!
//! [`ChunkFetcher`] pulls one archive page per call, reconstructs a full
//! snapshot for every frame in it, and advances its cursor just past the last
//! timestamp seen. The reconstruction state is carried across pages.

use crate::archive::ArchiveService;
use crate::delta::DeltaReconstructor;
use futures::Stream;
use racelog_core::{CoreResult, EventDescriptor, EventId, Snapshot};
use std::sync::Arc;
use tracing::trace;

/// Offset added to the last seen timestamp to form the next page cursor.
///
/// Frames less than this apart across a page boundary are skipped.
pub const CURSOR_EPSILON: f64 = 0.0001;

/// Lazy, paginated snapshot source for one archived event
pub struct ChunkFetcher {
    archive: Arc<dyn ArchiveService>,
    source: EventId,
    start: f64,
    cursor: f64,
    batch_size: usize,
    reconstructor: DeltaReconstructor,
    fetch_count: usize,
    exhausted: bool,
}

impl ChunkFetcher {
    /// Create a fetcher starting at `start`
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
            start,
            cursor: start,
            batch_size,
            reconstructor: DeltaReconstructor::new(),
            fetch_count: 0,
            exhausted: false,
        }
    }

    /// Create a fetcher starting at the event's first archived frame
    #[must_use]
    pub fn for_event(
        archive: Arc<dyn ArchiveService>,
        event: &EventDescriptor,
        batch_size: usize,
    ) -> Self {
        Self::new(archive, event.id, event.replay_start(), batch_size)
    }

    /// Fetch the next page and reconstruct its snapshots.
    ///
    /// Returns `None` once the archive returns an empty page; later calls keep
    /// returning `None` without touching the archive.
    ///
    /// # Errors
    ///
    /// Returns the archive error, or `CoreError::Decode` for a malformed frame
    pub async fn next_batch(&mut self) -> CoreResult<Option<Vec<Snapshot>>> {
        if self.exhausted {
            return Ok(None);
        }

        let frames = self
            .archive
            .fetch_frames(self.source, self.cursor, self.batch_size)
            .await?;
        self.fetch_count += 1;

        let Some(last_ts) = frames.last().map(|frame| frame.timestamp) else {
            trace!(source = %self.source, fetches = self.fetch_count, "source exhausted");
            self.exhausted = true;
            return Ok(None);
        };

        let mut snapshots = Vec::with_capacity(frames.len());
        for frame in frames {
            snapshots.push(self.reconstructor.push(frame)?.clone());
        }
        self.cursor = last_ts + CURSOR_EPSILON;

        trace!(
            source = %self.source,
            frames = snapshots.len(),
            cursor = self.cursor,
            "fetched page"
        );
        Ok(Some(snapshots))
    }

    /// Rewind to the start timestamp with a fresh reconstruction state
    pub fn restart(&mut self) {
        self.cursor = self.start;
        self.reconstructor.reset();
        self.fetch_count = 0;
        self.exhausted = false;
    }

    /// Convert into a stream of individual snapshots
    pub fn into_stream(self) -> impl Stream<Item = CoreResult<Snapshot>> + Send {
        futures::stream::try_unfold(
            (self, std::collections::VecDeque::new()),
            |(mut fetcher, mut pending)| async move {
                loop {
                    if let Some(snapshot) = pending.pop_front() {
                        return Ok(Some((snapshot, (fetcher, pending))));
                    }
                    match fetcher.next_batch().await {
                        Ok(Some(batch)) => pending.extend(batch),
                        Ok(None) => return Ok(None),
                        Err(err) => return Err(err),
                    }
                }
            },
        )
    }

    /// Source event id
    #[must_use]
    pub const fn source(&self) -> EventId {
        self.source
    }

    /// Timestamp the next page starts at
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of archive calls made so far, including the final empty one
    #[must_use]
    pub const fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    /// Whether the source has been read to the end
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl std::fmt::Debug for ChunkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFetcher")
            .field("source", &self.source)
            .field("cursor", &self.cursor)
            .field("batch_size", &self.batch_size)
            .field("fetch_count", &self.fetch_count)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}
