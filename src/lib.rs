//! CPU and memory self-sampling for the running process.
//!
//! [`read_usage`] returns `(cpu_percent, resident_bytes, virtual_bytes)` for
//! the calling process. Readings are refreshed at most once per throttle
//! window; CPU usage is the delta between two cumulative snapshots, so the
//! very first reading reports 0%.

pub mod config;
pub mod error;
pub mod format;
pub mod source;
pub mod usage;

pub use error::SampleError;
pub use usage::{UsageReader, UsageReading, read_usage};
