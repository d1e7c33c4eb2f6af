//! Racelog Simulation Support
//!
//! In-memory stand-ins for the archive and the publish transport, seeded
//! synthetic sessions, and failure injection. All generated data is
//! reproducible from a seed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod failure;
pub mod seed;
pub mod sink;

pub use archive::MemoryArchive;
pub use failure::FlakyArchive;
pub use seed::{SeedSource, SimSeed};
pub use sink::{NullSink, RecordingSink};
