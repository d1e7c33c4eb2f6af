//! Publish sinks without a transport.

use async_trait::async_trait;
use racelog_core::{CarData, CoreError, CoreResult, Snapshot, SpeedmapRecord, StreamKey};
use racelog_replay::{PublishSink, StreamAnnouncement};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct Recorded {
    registered: Vec<StreamAnnouncement>,
    published: HashMap<StreamKey, Vec<f64>>,
    speedmaps: HashMap<StreamKey, Vec<f64>>,
    car_data: Vec<StreamKey>,
    unregistered: Vec<StreamKey>,
}

/// Sink that records every call for later inspection.
///
/// Published snapshots and speedmap records are kept as their timestamps,
/// per stream key.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Recorded>,
    fail_register: bool,
}

impl RecordingSink {
    /// Create a sink that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every registration
    #[must_use]
    pub fn failing_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    fn with_recorded<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut recorded = self
            .recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut recorded)
    }

    /// Registrations in call order
    #[must_use]
    pub fn registered(&self) -> Vec<StreamAnnouncement> {
        self.with_recorded(|r| r.registered.clone())
    }

    /// Timestamps published on `key`, in publish order
    #[must_use]
    pub fn published(&self, key: &StreamKey) -> Vec<f64> {
        self.with_recorded(|r| r.published.get(key).cloned().unwrap_or_default())
    }

    /// Total snapshots published across all streams
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.with_recorded(|r| r.published.values().map(Vec::len).sum())
    }

    /// Speedmap timestamps published on `key`, in publish order
    #[must_use]
    pub fn speedmaps(&self, key: &StreamKey) -> Vec<f64> {
        self.with_recorded(|r| r.speedmaps.get(key).cloned().unwrap_or_default())
    }

    /// Streams that received a car data document, in call order
    #[must_use]
    pub fn car_data(&self) -> Vec<StreamKey> {
        self.with_recorded(|r| r.car_data.clone())
    }

    /// Unregistrations in call order
    #[must_use]
    pub fn unregistered(&self) -> Vec<StreamKey> {
        self.with_recorded(|r| r.unregistered.clone())
    }
}

#[async_trait]
impl PublishSink for RecordingSink {
    async fn register(&self, announcement: &StreamAnnouncement) -> CoreResult<()> {
        self.with_recorded(|r| r.registered.push(announcement.clone()));
        if self.fail_register {
            return Err(CoreError::sink("register", "registration rejected"));
        }
        Ok(())
    }

    async fn publish(&self, key: &StreamKey, snapshot: &Snapshot) -> CoreResult<()> {
        self.with_recorded(|r| {
            r.published
                .entry(key.clone())
                .or_default()
                .push(snapshot.timestamp);
        });
        Ok(())
    }

    async fn publish_car_data(&self, key: &StreamKey, _car_data: &CarData) -> CoreResult<()> {
        self.with_recorded(|r| r.car_data.push(key.clone()));
        Ok(())
    }

    async fn publish_speedmap(&self, key: &StreamKey, record: &SpeedmapRecord) -> CoreResult<()> {
        self.with_recorded(|r| {
            r.speedmaps
                .entry(key.clone())
                .or_default()
                .push(record.timestamp);
        });
        Ok(())
    }

    async fn unregister(&self, key: &StreamKey) -> CoreResult<()> {
        self.with_recorded(|r| r.unregistered.push(key.clone()));
        Ok(())
    }
}

/// Sink that discards snapshots and only counts them
#[derive(Debug, Default)]
pub struct NullSink {
    streams: AtomicUsize,
    published: AtomicUsize,
    side: AtomicUsize,
}

impl NullSink {
    /// Create a sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams registered so far
    #[must_use]
    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::Relaxed)
    }

    /// Snapshots published so far
    #[must_use]
    pub fn published(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    /// Car data documents and speedmap records published so far
    #[must_use]
    pub fn side_published(&self) -> usize {
        self.side.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PublishSink for NullSink {
    async fn register(&self, announcement: &StreamAnnouncement) -> CoreResult<()> {
        self.streams.fetch_add(1, Ordering::Relaxed);
        trace!(key = %announcement.key, name = %announcement.name, "register");
        Ok(())
    }

    async fn publish(&self, _key: &StreamKey, _snapshot: &Snapshot) -> CoreResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn publish_car_data(&self, _key: &StreamKey, _car_data: &CarData) -> CoreResult<()> {
        self.side.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn publish_speedmap(&self, _key: &StreamKey, _record: &SpeedmapRecord) -> CoreResult<()> {
        self.side.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn unregister(&self, key: &StreamKey) -> CoreResult<()> {
        trace!(key = %key, "unregister");
        Ok(())
    }
}
