//! Stress run configuration.
//!
//! A single immutable value built once (by the CLI or a test) and handed to the
//! scheduler and every replay pipeline it spawns.

use crate::error::{CoreError, CoreResult};
use crate::version::SourceVersion;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a run decides it is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Keep replenishing jobs until the test duration elapses
    Timed {
        /// Wall-clock test duration
        duration: Duration,
    },
    /// Issue exactly `runs` jobs, then drain
    Fixed {
        /// Number of jobs to issue
        runs: usize,
    },
}

impl RunMode {
    /// Short label used in report file names
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Timed { .. } => "timed",
            Self::Fixed { .. } => "browser",
        }
    }
}

/// Stress run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Replay speed multiplier (<= 0 means unthrottled)
    pub replay_speed: i64,
    /// Frames requested per archive page
    pub batch_size: usize,
    /// Wall-clock test duration in timed mode
    pub test_duration: Duration,
    /// Minimum recorded session length for a source event
    pub min_session_duration_minutes: u64,
    /// Minimum recording software version for a source event
    pub min_source_version: String,
    /// Fixed number of jobs; switches the run to fixed mode when set
    pub run_limit: Option<usize>,
    /// Only pick events whose session is shorter than this
    pub max_session_duration_minutes: Option<u64>,
    /// Publish every replay under this key instead of a generated one
    pub event_key: Option<String>,
    /// Seed for event picks (random when unset)
    pub seed: Option<u64>,
    /// Directory receiving the JSON report
    pub report_dir: PathBuf,
}

impl StressConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_count: 1,
            replay_speed: 1,
            batch_size: 30,
            test_duration: Duration::from_secs(10 * 60),
            min_session_duration_minutes: 5,
            min_source_version: "0.6.0".to_string(),
            run_limit: None,
            max_session_duration_minutes: None,
            event_key: None,
            seed: None,
            report_dir: PathBuf::from("."),
        }
    }

    /// Set worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set replay speed
    #[must_use]
    pub fn with_speed(mut self, speed: i64) -> Self {
        self.replay_speed = speed;
        self
    }

    /// Set archive page size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set test duration
    #[must_use]
    pub fn with_test_duration(mut self, duration: Duration) -> Self {
        self.test_duration = duration;
        self
    }

    /// Set minimum session duration
    #[must_use]
    pub fn with_min_session_minutes(mut self, minutes: u64) -> Self {
        self.min_session_duration_minutes = minutes;
        self
    }

    /// Set minimum source version
    #[must_use]
    pub fn with_min_source_version(mut self, version: impl Into<String>) -> Self {
        self.min_source_version = version.into();
        self
    }

    /// Switch to fixed mode with the given number of jobs
    #[must_use]
    pub fn with_run_limit(mut self, runs: usize) -> Self {
        self.run_limit = Some(runs);
        self
    }

    /// Set the race length limit
    #[must_use]
    pub fn with_max_session_minutes(mut self, minutes: u64) -> Self {
        self.max_session_duration_minutes = Some(minutes);
        self
    }

    /// Set a fixed stream key
    #[must_use]
    pub fn with_event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    /// Set the pick seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the report directory
    #[must_use]
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Run mode implied by the options
    #[must_use]
    pub fn mode(&self) -> RunMode {
        match self.run_limit {
            Some(runs) => RunMode::Fixed { runs },
            None => RunMode::Timed {
                duration: self.test_duration,
            },
        }
    }

    /// Whether replay is paced at all
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        self.replay_speed > 0
    }

    /// Pacing delay after forwarding a batch of `frames` snapshots
    #[must_use]
    pub fn batch_delay(&self, frames: usize) -> Duration {
        if self.replay_speed <= 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(frames as u64 * 1000 / self.replay_speed as u64)
    }

    /// Parsed minimum source version
    ///
    /// # Errors
    ///
    /// Returns error if the configured version is not a version
    pub fn min_version(&self) -> CoreResult<SourceVersion> {
        Ok(SourceVersion::parse(&self.min_source_version)?)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` naming the first rejected option
    pub fn validate(&self) -> CoreResult<()> {
        if self.worker_count == 0 {
            return Err(invalid("worker_count", "at least one worker is required"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.min_version().is_err() {
            return Err(invalid(
                "min_source_version",
                &format!("{:?} is not a version", self.min_source_version),
            ));
        }
        match self.mode() {
            RunMode::Timed { duration } if duration.is_zero() => {
                Err(invalid("test_duration", "must be positive"))
            }
            RunMode::Fixed { runs: 0 } => Err(invalid("run_limit", "must be positive")),
            _ => Ok(()),
        }
    }
}

impl Default for StressConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
