//! Archive access.

use async_trait::async_trait;
use racelog_core::{CarData, CoreResult, EventDescriptor, EventId, Frame, SpeedmapRecord};

/// Read access to the session archive.
///
/// Frames and speedmap records are returned in ascending timestamp order.
/// Errors are reported as `CoreError::Archive`, which callers treat as
/// transient.
#[async_trait]
pub trait ArchiveService: Send + Sync {
    /// Fetch up to `max_count` frames of `source` whose timestamp is `>= from`.
    ///
    /// An empty result means the source is exhausted.
    async fn fetch_frames(
        &self,
        source: EventId,
        from: f64,
        max_count: usize,
    ) -> CoreResult<Vec<Frame>>;

    /// List every archived event
    async fn list_events(&self) -> CoreResult<Vec<EventDescriptor>>;

    /// Fetch up to `max_count` speedmap records of `source` whose timestamp is `>= from`.
    ///
    /// An empty result means there are no further records. Archives without
    /// speedmaps keep the default, which has none.
    async fn fetch_speedmaps(
        &self,
        _source: EventId,
        _from: f64,
        _max_count: usize,
    ) -> CoreResult<Vec<SpeedmapRecord>> {
        Ok(Vec::new())
    }

    /// Car data document of `source`, if one was archived
    async fn fetch_car_data(&self, _source: EventId) -> CoreResult<Option<CarData>> {
        Ok(None)
    }
}
