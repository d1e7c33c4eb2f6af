//! Final stress report.
//!
//! The JSON artifact keeps the field names downstream tooling already reads:
//!
//! ```text
//! {"events": [{"id", "num", "numStates", "numFetches", "durations", "durationStats", "name"}],
//!  "workers": [...]}
//! ```
//!
//! Durations are integer nanoseconds.

use crate::stats::{DurationStats, nanos};
use racelog_core::{CoreResult, RunMode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Statistics of one event or worker group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Event id or worker id
    pub id: i64,
    /// Jobs in the group
    pub num: usize,
    /// Snapshots forwarded
    pub num_states: usize,
    /// Archive calls made
    pub num_fetches: usize,
    /// Job durations in arrival order
    #[serde(with = "nanos::list")]
    pub durations: Vec<Duration>,
    /// Derived statistics
    pub duration_stats: DurationStats,
    /// Display name
    pub name: String,
}

impl Summary {
    fn render(&self, out: &mut String) {
        let stats = &self.duration_stats;
        let _ = writeln!(out, "{}", self.name);
        let _ = writeln!(
            out,
            "Num: {} Total: {:?} Min: {:?} Max: {:?} Avg: {:?} Fetches: {} States: {}",
            self.num, stats.sum, stats.min, stats.max, stats.avg, self.num_fetches, self.num_states
        );
    }
}

/// Per-event and per-worker summaries, each sorted by id
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsReport {
    /// One summary per replayed event
    pub events: Vec<Summary>,
    /// One summary per worker that finished a job
    pub workers: Vec<Summary>,
}

impl StatsReport {
    /// Render the human-readable summary
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for summary in &self.events {
            summary.render(&mut out);
        }
        if !self.workers.is_empty() {
            out.push('\n');
        }
        for summary in &self.workers {
            summary.render(&mut out);
        }
        out
    }

    /// Encode as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Encoding` if serialization fails
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `stress-<mode>-<YYYYmmdd-HHMMSS>.json` into `dir`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` if the file cannot be written
    pub fn write_json(&self, dir: &Path, mode: RunMode) -> CoreResult<PathBuf> {
        let file_name = format!(
            "stress-{}-{}.json",
            mode.label(),
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );
        let path = dir.join(file_name);
        std::fs::write(&path, self.to_json()?)?;
        info!(path = %path.display(), "wrote report");
        Ok(path)
    }

    /// Total snapshots across all events
    #[must_use]
    pub fn total_states(&self) -> usize {
        self.events.iter().map(|s| s.num_states).sum()
    }

    /// Total jobs across all events
    #[must_use]
    pub fn total_jobs(&self) -> usize {
        self.events.iter().map(|s| s.num).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{JobResult, StatsAggregator};
    use racelog_core::{EventId, JobId, WorkerId};

    fn report() -> StatsReport {
        let mut aggregator = StatsAggregator::new();
        for (job, worker, source, millis) in [(1, 1, 7, 1500), (2, 2, 7, 500), (3, 1, 3, 1000)] {
            aggregator.record(&JobResult {
                job_id: JobId::new(job),
                worker_id: WorkerId::new(worker),
                source: EventId::new(source),
                source_name: "Spa".to_string(),
                duration: Duration::from_millis(millis),
                fetch_count: 2,
                frame_count: 40,
                cancelled: false,
            });
        }
        aggregator.finalize()
    }

    #[test]
    fn test_json_field_names() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        let first = &json["events"][0];
        assert_eq!(first["id"], 3);
        assert_eq!(first["num"], 1);
        assert_eq!(first["numStates"], 40);
        assert_eq!(first["numFetches"], 2);
        assert_eq!(first["durations"], serde_json::json!([1_000_000_000u64]));
        assert_eq!(first["durationStats"]["avg"], 1_000_000_000u64);
        assert_eq!(first["name"], "Event: 3-Spa");
        assert_eq!(json["workers"][1]["name"], "Worker: 2");
    }

    #[test]
    fn test_render_text() {
        let text = report().render_text();
        assert!(text.contains("Event: 7-Spa\nNum: 2 Total: 2s Min: 500ms Max: 1.5s Avg: 1s Fetches: 4 States: 80"));
        assert!(text.contains("Worker: 1"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = report()
            .write_json(dir.path(), RunMode::Fixed { runs: 3 })
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("stress-browser-"));
        assert!(name.ends_with(".json"));

        let back: StatsReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report());
        assert_eq!(back.total_states(), 120);
        assert_eq!(back.total_jobs(), 3);
    }

    #[test]
    fn test_write_json_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(report().write_json(&missing, RunMode::Fixed { runs: 1 }).is_err());
    }
}
