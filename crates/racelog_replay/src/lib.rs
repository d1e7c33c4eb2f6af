//! Racelog Replay Engine
//!
//! Reconstruction of full snapshots from archived full/delta frames,
//! paginated fetching, and paced replay onto a publish sink with speedmap
//! records merged in by timestamp.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod delta;
pub mod fetcher;
pub mod pipeline;
pub mod sink;
pub mod speedmap;

pub use archive::ArchiveService;
pub use delta::{DeltaReconstructor, apply};
pub use fetcher::{CURSOR_EPSILON, ChunkFetcher};
pub use pipeline::{ReplayOutcome, ReplayPipeline};
pub use sink::{PublishSink, StreamAnnouncement};
pub use speedmap::{SPEEDMAP_BATCH_SIZE, SpeedmapFeed};
