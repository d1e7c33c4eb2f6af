//! Archived event metadata.
//!
//! Only the fields needed to pick replay material are modeled; anything else the
//! archive sends is ignored on deserialization.

use crate::id::EventId;
use crate::version::{SourceVersion, VersionError};
use serde::{Deserialize, Serialize};

/// Descriptive information about an event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// Version of the software that recorded the event
    #[serde(default)]
    pub racelogger_version: Option<String>,
    /// Event name as recorded
    #[serde(default)]
    pub name: String,
    /// Track name for display
    #[serde(default)]
    pub track_display_name: String,
}

/// Time bounds of the recorded session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInfo {
    /// Timestamp of the first archived frame, where replay starts
    #[serde(default)]
    pub min_timestamp: f64,
    /// Session time at the start of the recording (seconds)
    #[serde(default)]
    pub min_session_time: f64,
    /// Session time at the end of the recording (seconds)
    #[serde(default)]
    pub max_session_time: f64,
}

/// Nested event data
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Descriptive info
    #[serde(default)]
    pub info: EventInfo,
    /// Replay bounds
    #[serde(default)]
    pub replay_info: ReplayInfo,
}

/// An archived session usable as replay material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescriptor {
    /// Archive id of the event
    pub id: EventId,
    /// Event name
    #[serde(default)]
    pub name: String,
    /// Key the event was originally published under
    #[serde(default)]
    pub event_key: String,
    /// Metadata
    #[serde(default)]
    pub data: EventData,
}

impl EventDescriptor {
    /// Create a descriptor with empty metadata
    #[must_use]
    pub fn new(id: EventId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            event_key: String::new(),
            data: EventData::default(),
        }
    }

    /// Set the session time bounds
    #[must_use]
    pub fn with_session_times(mut self, min: f64, max: f64) -> Self {
        self.data.replay_info.min_session_time = min;
        self.data.replay_info.max_session_time = max;
        self
    }

    /// Set the replay start timestamp
    #[must_use]
    pub fn with_min_timestamp(mut self, ts: f64) -> Self {
        self.data.replay_info.min_timestamp = ts;
        self
    }

    /// Set the recording software version
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.data.info.racelogger_version = Some(version.into());
        self
    }

    /// Length of the recorded session in seconds
    #[must_use]
    pub fn session_duration_secs(&self) -> f64 {
        self.data.replay_info.max_session_time - self.data.replay_info.min_session_time
    }

    /// Timestamp where replay starts
    #[must_use]
    pub fn replay_start(&self) -> f64 {
        self.data.replay_info.min_timestamp
    }

    /// Parsed recording software version.
    ///
    /// `None` when the event carries no version tag.
    ///
    /// # Errors
    ///
    /// Returns error if a tag is present but not a version
    pub fn source_version(&self) -> Result<Option<SourceVersion>, VersionError> {
        match self.data.info.racelogger_version.as_deref() {
            None | Some("") => Ok(None),
            Some(tag) => SourceVersion::parse(tag).map(Some),
        }
    }

    /// Whether the recording is recent enough to carry car data.
    ///
    /// Untagged or unparseable versions count as too old.
    #[must_use]
    pub fn has_car_data(&self) -> bool {
        matches!(self.source_version(), Ok(Some(version)) if version >= crate::side::car_data_min_version())
    }

    /// One-line description for logs and reports
    #[must_use]
    pub fn overview(&self) -> String {
        format!(
            "{}-{} ({:.0} min, {})",
            self.id,
            self.name,
            self.session_duration_secs() / 60.0,
            self.data
                .info
                .racelogger_version
                .as_deref()
                .unwrap_or("unknown version")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_archive_event() {
        let event: EventDescriptor = serde_json::from_str(
            r#"{
                "id": 12,
                "name": "Daytona 24",
                "eventKey": "abc",
                "recordDate": "2022-01-01",
                "data": {
                    "info": {"raceloggerVersion": "0.6.1", "name": "Daytona 24"},
                    "replayInfo": {"minTimestamp": 1000.5, "minSessionTime": 10, "maxSessionTime": 3610}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(event.id, EventId::new(12));
        assert_eq!(event.replay_start(), 1000.5);
        assert_eq!(event.session_duration_secs(), 3600.0);
        assert_eq!(
            event.source_version().unwrap(),
            Some(SourceVersion::parse("0.6.1").unwrap())
        );
    }

    #[test]
    fn test_missing_version() {
        let event = EventDescriptor::new(EventId::new(1), "no version");
        assert_eq!(event.source_version().unwrap(), None);

        let event = event.with_version("");
        assert_eq!(event.source_version().unwrap(), None);
    }

    #[test]
    fn test_invalid_version() {
        let event = EventDescriptor::new(EventId::new(1), "bad").with_version("latest");
        assert!(event.source_version().is_err());
    }

    #[test]
    fn test_has_car_data() {
        let event = EventDescriptor::new(EventId::new(1), "Monza");
        assert!(!event.has_car_data());
        assert!(!event.clone().with_version("0.4.3").has_car_data());
        assert!(!event.clone().with_version("nightly").has_car_data());
        assert!(event.clone().with_version("v0.4.4").has_car_data());
        assert!(event.with_version("0.6.0").has_car_data());
    }

    #[test]
    fn test_builders() {
        let event = EventDescriptor::new(EventId::new(3), "Spa")
            .with_session_times(100.0, 400.0)
            .with_min_timestamp(55.0)
            .with_version("v0.5.0");
        assert_eq!(event.session_duration_secs(), 300.0);
        assert_eq!(event.replay_start(), 55.0);
        assert!(event.overview().contains("Spa"));
    }
}
