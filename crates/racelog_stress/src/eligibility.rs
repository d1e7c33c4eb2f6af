//! Source event eligibility.
//!
//! Timed runs only replay sessions that ran long enough and were recorded by a
//! recent enough logger. Fixed runs pick from every archived session, subject
//! to the optional race limit.

use racelog_core::{CoreResult, EventDescriptor, RunMode, SourceVersion, StressConfig};
use tracing::{debug, warn};

/// Whether the recorded session is strictly longer than `minutes`
#[must_use]
pub fn is_min_session_length(event: &EventDescriptor, minutes: u64) -> bool {
    event.session_duration_secs() > (minutes * 60) as f64
}

/// Whether the event was recorded by at least version `minimum`.
///
/// Events without a version tag, or with an unparseable one, fail.
#[must_use]
pub fn meets_min_version(event: &EventDescriptor, minimum: &SourceVersion) -> bool {
    match event.source_version() {
        Ok(None) => false,
        Ok(Some(version)) => version >= *minimum,
        Err(err) => {
            warn!(event = %event.id, error = %err, "skipping event with unreadable version");
            false
        }
    }
}

/// Whether the recorded session is strictly shorter than `max_minutes`, if set
#[must_use]
pub fn within_race_limit(event: &EventDescriptor, max_minutes: Option<u64>) -> bool {
    max_minutes.is_none_or(|max| event.session_duration_secs() < (max * 60) as f64)
}

/// Filter `events` down to the replay pool.
///
/// Timed runs need a long enough session from a recent enough logger. Fixed
/// runs page through archived sessions like a browser would and only honor the
/// race limit. Both apply the race limit when one is set. Order and duplicates
/// are preserved.
///
/// # Errors
///
/// Returns error if the configured minimum version does not parse
pub fn eligible_events(
    events: &[EventDescriptor],
    config: &StressConfig,
) -> CoreResult<Vec<EventDescriptor>> {
    let pool: Vec<EventDescriptor> = match config.mode() {
        RunMode::Timed { .. } => {
            let minimum = config.min_version()?;
            events
                .iter()
                .filter(|event| {
                    is_min_session_length(event, config.min_session_duration_minutes)
                        && meets_min_version(event, &minimum)
                        && within_race_limit(event, config.max_session_duration_minutes)
                })
                .cloned()
                .collect()
        }
        RunMode::Fixed { .. } => events
            .iter()
            .filter(|event| within_race_limit(event, config.max_session_duration_minutes))
            .cloned()
            .collect(),
    };

    debug!(total = events.len(), eligible = pool.len(), "filtered source events");
    Ok(pool)
}
