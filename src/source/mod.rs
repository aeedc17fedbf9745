//! Interchangeable snapshot backends.
//!
//! Every backend answers the same question, "what are the counters right
//! now", through [`SnapshotSource`]. Which one runs is picked from the
//! configuration when the reader is built, so the engine and the resolver
//! never see a concrete backend.

use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::usage::snapshot::{CounterIdentity, Snapshot};

pub mod native;
pub mod platform;
pub mod typeperf;

pub trait SnapshotSource: Send + Sync {
    /// True when `query` needs a counter instance name to address the
    /// process, false when the backend samples itself directly.
    fn requires_identity(&self) -> bool;

    /// Reads one snapshot. Backends that need a name report an absent
    /// instance as `SampleError::InstanceMissing`.
    fn query(&self, identity: Option<&CounterIdentity>) -> Result<Snapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Direct,
    Sysinfo,
    Typeperf,
}

impl SourceKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "direct" | "syscall" => Some(SourceKind::Direct),
            "sysinfo" | "native" => Some(SourceKind::Sysinfo),
            "typeperf" | "command" => Some(SourceKind::Typeperf),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Direct => "direct",
            SourceKind::Sysinfo => "sysinfo",
            SourceKind::Typeperf => "typeperf",
        }
    }
}

pub fn build_source(config: &BackendConfig) -> Arc<dyn SnapshotSource> {
    let kind = SourceKind::from_name(&config.kind).unwrap_or_default();
    match kind {
        SourceKind::Direct => Arc::new(platform::DirectSource::new()),
        SourceKind::Sysinfo => Arc::new(native::SysinfoSource::new()),
        SourceKind::Typeperf => Arc::new(typeperf::TypeperfSource::new(
            config.command.clone(),
            Duration::from_millis(config.query_timeout_ms),
        )),
    }
}

pub(crate) fn available_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
