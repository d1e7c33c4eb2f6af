//! Publish sinks.
//!
//! A sink receives replayed snapshots under a stream key. Each replay
//! registers its stream once, publishes the car data document if the source
//! has one, then every snapshot in order with speedmap records merged in by
//! timestamp, and finally unregisters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use racelog_core::{
    CarData, CoreResult, EventDescriptor, EventId, EventInfo, Snapshot, SpeedmapRecord, StreamKey,
};
use serde::{Deserialize, Serialize};

/// Registration message for a replayed stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamAnnouncement {
    /// Key the snapshots are published under
    pub key: StreamKey,
    /// Stream name, `stresstest-<timestamp>`
    pub name: String,
    /// Archived event being replayed
    pub source: EventId,
    /// Name of the archived event
    pub source_name: String,
    /// When the stream was announced
    pub record_date: DateTime<Utc>,
    /// Event info copied from the source
    pub info: EventInfo,
}

impl StreamAnnouncement {
    /// Build the announcement for replaying `event`.
    ///
    /// The key is derived from the stream name and a random uuid unless
    /// `key_override` is given.
    #[must_use]
    pub fn for_event(event: &EventDescriptor, key_override: Option<&str>) -> Self {
        let record_date = Utc::now();
        let name = format!("stresstest-{}", record_date.format("%Y%m%d-%H%M%S"));
        let key = match key_override {
            Some(key) => StreamKey::new(key),
            None => generate_key(&name),
        };

        Self {
            key,
            name,
            source: event.id,
            source_name: event.name.clone(),
            record_date,
            info: event.data.info.clone(),
        }
    }
}

fn generate_key(name: &str) -> StreamKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    StreamKey::new(hex::encode(hasher.finalize().as_bytes()))
}

/// Destination for replayed snapshots.
///
/// Failures are reported as `CoreError::Sink` and abort the current replay.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Announce a new stream
    async fn register(&self, announcement: &StreamAnnouncement) -> CoreResult<()>;

    /// Publish one snapshot on a registered stream
    async fn publish(&self, key: &StreamKey, snapshot: &Snapshot) -> CoreResult<()>;

    /// Publish the car data document of a registered stream
    async fn publish_car_data(&self, key: &StreamKey, car_data: &CarData) -> CoreResult<()>;

    /// Publish one speedmap record on a registered stream
    async fn publish_speedmap(&self, key: &StreamKey, record: &SpeedmapRecord) -> CoreResult<()>;

    /// Withdraw a stream
    async fn unregister(&self, key: &StreamKey) -> CoreResult<()>;
}
