//! Job result aggregation.
//!
//! A single aggregator task owns the [`StatsAggregator`] and records every
//! [`JobResult`] as it arrives. Groups are kept in ordered maps, so the
//! finalized report is sorted by id and independent of arrival order except
//! for the raw duration lists, which stay in arrival order.

use crate::report::{StatsReport, Summary};
use racelog_core::{EventId, JobId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one finished or cancelled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Job id
    pub job_id: JobId,
    /// Worker that ran the job
    pub worker_id: WorkerId,
    /// Replayed event
    pub source: EventId,
    /// Name of the replayed event
    pub source_name: String,
    /// Wall time of the replay
    pub duration: Duration,
    /// Archive calls made
    pub fetch_count: usize,
    /// Snapshots forwarded
    pub frame_count: usize,
    /// Whether the replay was cut short by cancellation
    pub cancelled: bool,
}

/// Running totals of one group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupStats {
    /// Display name
    pub name: String,
    /// Jobs recorded
    pub count: usize,
    /// Sum of fetch counts
    pub total_fetches: usize,
    /// Sum of frame counts
    pub total_frames: usize,
    /// Job durations in arrival order
    pub durations: Vec<Duration>,
}

impl GroupStats {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn record(&mut self, result: &JobResult) {
        self.count += 1;
        self.total_fetches += result.fetch_count;
        self.total_frames += result.frame_count;
        self.durations.push(result.duration);
    }

    fn summarize(self, id: i64) -> Summary {
        Summary {
            id,
            num: self.count,
            num_states: self.total_frames,
            num_fetches: self.total_fetches,
            duration_stats: DurationStats::from_durations(&self.durations),
            durations: self.durations,
            name: self.name,
        }
    }
}

/// Derived statistics over a list of durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DurationStats {
    /// Shortest duration
    #[serde(with = "nanos")]
    pub min: Duration,
    /// Longest duration
    #[serde(with = "nanos")]
    pub max: Duration,
    /// Mean duration, truncated to whole nanoseconds
    #[serde(with = "nanos")]
    pub avg: Duration,
    /// Sum of all durations
    #[serde(with = "nanos")]
    pub sum: Duration,
}

impl DurationStats {
    /// Compute statistics; all zero for an empty list
    #[must_use]
    pub fn from_durations(durations: &[Duration]) -> Self {
        let (Some(min), Some(max)) = (durations.iter().min(), durations.iter().max()) else {
            return Self::default();
        };
        let sum: Duration = durations.iter().sum();
        let avg_nanos = sum.as_nanos() / durations.len() as u128;

        Self {
            min: *min,
            max: *max,
            avg: Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX)),
            sum,
        }
    }
}

/// Accumulates job results per event and per worker
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    events: BTreeMap<EventId, GroupStats>,
    workers: BTreeMap<WorkerId, GroupStats>,
    recorded: usize,
    cancelled: usize,
}

impl StatsAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one job result
    pub fn record(&mut self, result: &JobResult) {
        self.events
            .entry(result.source)
            .or_insert_with(|| GroupStats::new(format!("Event: {}-{}", result.source, result.source_name)))
            .record(result);
        self.workers
            .entry(result.worker_id)
            .or_insert_with(|| GroupStats::new(format!("Worker: {}", result.worker_id.as_usize())))
            .record(result);

        self.recorded += 1;
        if result.cancelled {
            self.cancelled += 1;
        }
    }

    /// Number of results recorded
    #[must_use]
    pub const fn recorded(&self) -> usize {
        self.recorded
    }

    /// Number of recorded results that were cut short by cancellation
    #[must_use]
    pub const fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Totals of one event, if any job replayed it
    #[must_use]
    pub fn event(&self, id: EventId) -> Option<&GroupStats> {
        self.events.get(&id)
    }

    /// Totals of one worker, if it finished any job
    #[must_use]
    pub fn worker(&self, id: WorkerId) -> Option<&GroupStats> {
        self.workers.get(&id)
    }

    /// Derive per-group statistics, sorted by id ascending
    #[must_use]
    pub fn finalize(self) -> StatsReport {
        StatsReport {
            events: self
                .events
                .into_iter()
                .map(|(id, group)| group.summarize(id.as_i64()))
                .collect(),
            workers: self
                .workers
                .into_iter()
                .map(|(id, group)| group.summarize(id.as_usize() as i64))
                .collect(),
        }
    }
}

/// Serde adapter writing durations as integer nanoseconds
pub(crate) mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(as_nanos(value))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }

    pub(crate) fn as_nanos(value: &Duration) -> u64 {
        u64::try_from(value.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Same encoding for a list of durations
    pub(crate) mod list {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub(crate) fn serialize<S: Serializer>(values: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(super::as_nanos))
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
            Ok(Vec::<u64>::deserialize(deserializer)?
                .into_iter()
                .map(Duration::from_nanos)
                .collect())
        }
    }
}
