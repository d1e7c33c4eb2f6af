//! In-memory archive.
//!
//! Serves events and frames from memory, loaded from a directory dump or
//! generated from a seed. A directory dump holds `events.json` (an array of
//! event descriptors) and one `frames-<id>.json` array per event, plus
//! optional `speedmaps-<id>.json` arrays and `cardata-<id>.json` documents.

use crate::seed::SimSeed;
use async_trait::async_trait;
use racelog_core::{
    CarData, CarPatch, CellValue, CoreError, CoreResult, DeltaPayload, EventDescriptor, EventId,
    Frame, Payload, SessionPatch, SpeedmapRecord,
};
use racelog_replay::ArchiveService;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

const SYNTHETIC_CARS: usize = 4;
const SYNTHETIC_COLUMNS: usize = 5;
const SYNTHETIC_START: f64 = 1000.0;
const SYNTHETIC_SPEEDMAP_EVERY: usize = 10;
const SYNTHETIC_CHUNKS: usize = 8;

/// Archive backed by in-memory frame lists
#[derive(Debug, Default)]
pub struct MemoryArchive {
    events: Vec<EventDescriptor>,
    frames: HashMap<EventId, Vec<Frame>>,
    speedmaps: HashMap<EventId, Vec<SpeedmapRecord>>,
    car_data: HashMap<EventId, CarData>,
    latency: Duration,
    fetches: AtomicUsize,
}

impl MemoryArchive {
    /// Create an empty archive
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event with its frames; frames are kept in timestamp order
    #[must_use]
    pub fn with_event(mut self, event: EventDescriptor, mut frames: Vec<Frame>) -> Self {
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.frames.insert(event.id, frames);
        self.events.push(event);
        self
    }

    /// Attach speedmap records to an event; records are kept in timestamp order
    #[must_use]
    pub fn with_speedmaps(mut self, id: EventId, mut records: Vec<SpeedmapRecord>) -> Self {
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.speedmaps.insert(id, records);
        self
    }

    /// Attach a car data document to an event
    #[must_use]
    pub fn with_car_data(mut self, id: EventId, car_data: CarData) -> Self {
        self.car_data.insert(id, car_data);
        self
    }

    /// Delay every archive call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Generate `events` sessions of `frames_per_event` frames each.
    ///
    /// Events get ids `1..=events`, a one hour session and a current
    /// recording version, so they pass the default eligibility filter. Each
    /// session starts with a full frame followed by random deltas one second
    /// apart, carries a speedmap record every ten frames and a car data
    /// document for its entry list.
    #[must_use]
    pub fn synthetic(seed: &SimSeed, events: usize, frames_per_event: usize) -> Self {
        let mut archive = Self::new();
        for id in 1..=events as i64 {
            let event = EventDescriptor::new(EventId::new(id), format!("synthetic {}", id))
                .with_session_times(0.0, 3600.0)
                .with_min_timestamp(SYNTHETIC_START)
                .with_version("0.7.0");
            let event_seed = seed.derive(&format!("event-{}", id));
            let frames = synthetic_frames(event_seed.clone(), frames_per_event);
            let speedmaps = synthetic_speedmaps(event_seed.derive("speedmaps"), frames_per_event);
            archive = archive
                .with_event(event, frames)
                .with_speedmaps(EventId::new(id), speedmaps)
                .with_car_data(EventId::new(id), synthetic_car_data());
        }
        archive
    }

    /// Load a directory dump.
    ///
    /// Events without a frames file get an empty frame list; speedmap and
    /// car data files are optional.
    ///
    /// # Errors
    ///
    /// Returns error if `events.json` is missing or any file does not parse
    pub fn load_dir(dir: &Path) -> CoreResult<Self> {
        let events: Vec<EventDescriptor> =
            serde_json::from_str(&std::fs::read_to_string(dir.join("events.json"))?)?;

        let mut archive = Self::new();
        for event in events {
            let id = event.id;
            let frames: Vec<Frame> =
                read_optional(&dir.join(format!("frames-{}.json", id)))?.unwrap_or_default();
            let speedmaps: Vec<SpeedmapRecord> =
                read_optional(&dir.join(format!("speedmaps-{}.json", id)))?.unwrap_or_default();
            let car_data: Option<CarData> =
                read_optional(&dir.join(format!("cardata-{}.json", id)))?;
            debug!(
                event = %id,
                frames = frames.len(),
                speedmaps = speedmaps.len(),
                car_data = car_data.is_some(),
                "loaded event"
            );
            archive = archive.with_event(event, frames).with_speedmaps(id, speedmaps);
            if let Some(car_data) = car_data {
                archive = archive.with_car_data(id, car_data);
            }
        }
        Ok(archive)
    }

    /// Number of `fetch_frames` calls served
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Frames stored for one event
    #[must_use]
    pub fn frames(&self, id: EventId) -> Option<&[Frame]> {
        self.frames.get(&id).map(Vec::as_slice)
    }
}

#[async_trait]
impl ArchiveService for MemoryArchive {
    async fn fetch_frames(
        &self,
        source: EventId,
        from: f64,
        max_count: usize,
    ) -> CoreResult<Vec<Frame>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let frames = self.frames.get(&source).ok_or_else(|| CoreError::Archive {
            source_id: source.as_i64(),
            reason: "unknown event".to_string(),
        })?;
        let start = frames.partition_point(|frame| frame.timestamp < from);
        let page: Vec<Frame> = frames[start..].iter().take(max_count).cloned().collect();
        trace!(source = %source, from, frames = page.len(), "served page");
        Ok(page)
    }

    async fn list_events(&self) -> CoreResult<Vec<EventDescriptor>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.events.clone())
    }

    async fn fetch_speedmaps(
        &self,
        source: EventId,
        from: f64,
        max_count: usize,
    ) -> CoreResult<Vec<SpeedmapRecord>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let Some(records) = self.speedmaps.get(&source) else {
            return Ok(Vec::new());
        };
        let start = records.partition_point(|record| record.timestamp < from);
        Ok(records[start..].iter().take(max_count).cloned().collect())
    }

    async fn fetch_car_data(&self, source: EventId) -> CoreResult<Option<CarData>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.car_data.get(&source).cloned())
    }
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&std::fs::read_to_string(path)?)?))
}

fn synthetic_speedmaps(seed: SimSeed, frame_count: usize) -> Vec<SpeedmapRecord> {
    let mut rng = seed.rng();
    (0..frame_count)
        .step_by(SYNTHETIC_SPEEDMAP_EVERY)
        .map(|i| {
            let speeds: Vec<f64> = (0..SYNTHETIC_CHUNKS)
                .map(|_| f64::from(rng.gen_range(80_000u32..320_000)) / 1000.0)
                .collect();
            SpeedmapRecord::new(
                SYNTHETIC_START + i as f64 + 0.5,
                json!({"type": 2, "chunkSpeeds": speeds}),
            )
        })
        .collect()
}

fn synthetic_car_data() -> CarData {
    let entries: Vec<_> = (1..=SYNTHETIC_CARS)
        .map(|car| json!({"carNum": car.to_string(), "name": format!("Car {}", car)}))
        .collect();
    CarData(json!({"entries": entries}))
}

fn synthetic_frames(seed: SimSeed, count: usize) -> Vec<Frame> {
    let mut rng = seed.rng();
    let mut frames = Vec::with_capacity(count);
    if count == 0 {
        return frames;
    }

    let cars = (0..SYNTHETIC_CARS)
        .map(|car| {
            let mut row = vec![CellValue::from("RUN"), CellValue::from(car as i64 + 1)];
            row.resize(SYNTHETIC_COLUMNS, CellValue::Number(0.0));
            row
        })
        .collect();
    let session = vec![CellValue::from("RACING"), CellValue::Number(0.0)];
    frames.push(Frame::full(SYNTHETIC_START, Payload::new(cars, session, Vec::new())));

    for i in 1..count {
        let session_ops = [SessionPatch {
            col: 1,
            value: CellValue::Number(i as f64),
        }];
        let car_ops: Vec<CarPatch> = (0..rng.gen_range(0..=SYNTHETIC_CARS))
            .map(|_| CarPatch {
                row: rng.gen_range(0..SYNTHETIC_CARS),
                col: rng.gen_range(2..SYNTHETIC_COLUMNS),
                value: CellValue::Number(f64::from(rng.gen_range(0u32..100_000)) / 1000.0),
            })
            .collect();
        frames.push(Frame::delta(
            SYNTHETIC_START + i as f64,
            DeltaPayload::from_ops(&session_ops, &car_ops, Vec::new()),
        ));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelog_replay::ChunkFetcher;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pages_by_timestamp() {
        let archive = MemoryArchive::synthetic(&SimSeed::from_literal(1), 1, 10);
        let id = EventId::new(1);

        let page = archive.fetch_frames(id, 0.0, 4).await.unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].timestamp, SYNTHETIC_START);

        let page = archive.fetch_frames(id, SYNTHETIC_START + 8.5, 4).await.unwrap();
        assert_eq!(page.len(), 1);
        assert!(archive.fetch_frames(id, 1e9, 4).await.unwrap().is_empty());
        assert_eq!(archive.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_event_is_archive_error() {
        let archive = MemoryArchive::new();
        let err = archive.fetch_frames(EventId::new(5), 0.0, 1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = MemoryArchive::synthetic(&SimSeed::from_literal(9), 2, 20);
        let b = MemoryArchive::synthetic(&SimSeed::from_literal(9), 2, 20);
        assert_eq!(a.frames(EventId::new(2)), b.frames(EventId::new(2)));
        assert_eq!(a.events, b.events);
    }

    #[tokio::test]
    async fn test_synthetic_session_reconstructs() {
        let archive = Arc::new(MemoryArchive::synthetic(&SimSeed::from_literal(4), 1, 25));
        let events = archive.list_events().await.unwrap();
        let mut fetcher = ChunkFetcher::for_event(archive, &events[0], 10);

        let mut last = None;
        let mut count = 0;
        while let Some(batch) = fetcher.next_batch().await.unwrap() {
            count += batch.len();
            last = batch.last().cloned();
        }
        assert_eq!(count, 25);
        let last = last.unwrap();
        assert_eq!(last.payload.cars.len(), SYNTHETIC_CARS);
        assert_eq!(last.payload.session[1], CellValue::Number(24.0));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("events.json"),
            r#"[{"id": 3, "name": "Le Mans", "data": {"replayInfo": {"minTimestamp": 10}}},
                {"id": 4, "name": "no frames"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("frames-3.json"),
            r#"[{"type": 8, "timestamp": 11, "payload": {"session": [[0, 5]]}},
                {"type": 1, "timestamp": 10, "payload": {"session": [1]}}]"#,
        )
        .unwrap();

        let archive = MemoryArchive::load_dir(dir.path()).unwrap();
        let frames = archive.frames(EventId::new(3)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, 10.0);
        assert_eq!(archive.frames(EventId::new(4)).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_load_dir_side_channels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("events.json"),
            r#"[{"id": 3, "name": "Le Mans"}, {"id": 4, "name": "bare"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("speedmaps-3.json"),
            r#"[{"timestamp": 12, "payload": {}}, {"timestamp": 11, "payload": {}}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("cardata-3.json"), r#"{"entries": []}"#).unwrap();

        let archive = MemoryArchive::load_dir(dir.path()).unwrap();
        let records = archive.fetch_speedmaps(EventId::new(3), 0.0, 10).await.unwrap();
        assert_eq!(records.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![11.0, 12.0]);
        assert!(archive.fetch_car_data(EventId::new(3)).await.unwrap().is_some());
        assert!(archive.fetch_speedmaps(EventId::new(4), 0.0, 10).await.unwrap().is_empty());
        assert!(archive.fetch_car_data(EventId::new(4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synthetic_speedmaps_page_by_timestamp() {
        let archive = MemoryArchive::synthetic(&SimSeed::from_literal(2), 1, 25);
        let id = EventId::new(1);

        let all = archive.fetch_speedmaps(id, 0.0, 30).await.unwrap();
        let stamps: Vec<f64> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            vec![SYNTHETIC_START + 0.5, SYNTHETIC_START + 10.5, SYNTHETIC_START + 20.5]
        );
        let rest = archive.fetch_speedmaps(id, SYNTHETIC_START + 0.6, 1).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].timestamp, SYNTHETIC_START + 10.5);
        assert!(archive.fetch_car_data(id).await.unwrap().is_some());
    }

    #[test]
    fn test_load_dir_missing_events() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MemoryArchive::load_dir(dir.path()).is_err());
    }
}
