//! Racelog Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Frames and snapshots serialize to the archive's JSON wire shape.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod id;
pub mod side;
pub mod version;

// Re-exports
pub use cell::{CellValue, MAX_TABLE_INDEX};
pub use config::{RunMode, StressConfig};
pub use error::{CoreError, CoreResult};
pub use event::{EventData, EventDescriptor, EventInfo, ReplayInfo};
pub use frame::{CarPatch, DeltaPayload, Frame, FrameKind, FramePayload, Payload, SessionPatch, Snapshot};
pub use id::{EventId, JobId, StreamKey, WorkerId};
pub use side::{CarData, SpeedmapRecord, car_data_min_version};
pub use version::{SourceVersion, VersionError};
