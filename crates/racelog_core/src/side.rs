//! Side channels of a recorded event.
//!
//! Recent recordings carry, next to the state frames, periodic speedmap
//! records and one car data document describing the entry list. Both are
//! forwarded verbatim; only the speedmap timestamp is interpreted.

use crate::version::SourceVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First recording version that archives car data
#[must_use]
pub const fn car_data_min_version() -> SourceVersion {
    SourceVersion::new(0, 4, 4)
}

/// One archived speedmap record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedmapRecord {
    /// Archive timestamp, on the same clock as state frames
    #[serde(default)]
    pub timestamp: f64,
    /// Record body
    #[serde(default)]
    pub payload: Value,
}

impl SpeedmapRecord {
    /// Create a record
    #[must_use]
    pub fn new(timestamp: f64, payload: Value) -> Self {
        Self { timestamp, payload }
    }
}

/// Car data document of an event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarData(pub Value);
