//! The sampling core: snapshot types, identity resolution, delta computation
//! and the reader facade tying them together.

pub mod engine;
pub mod reader;
pub mod resolver;
pub mod snapshot;

pub use engine::DeltaEngine;
pub use reader::{ReaderOptions, UsageReader, global_reader, read_usage};
pub use resolver::{IdentityResolver, Resolution};
pub use snapshot::{CounterIdentity, CpuScale, Snapshot, UsageReading};
