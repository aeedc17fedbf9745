use std::time::Instant;

use super::SnapshotSource;
use crate::error::Result;
use crate::usage::snapshot::{CounterIdentity, Snapshot};

/// Cumulative CPU time of this process and of the whole machine.
///
/// System kernel time includes idle time, matching what `GetSystemTimes`
/// reports, so `system_kernel + system_user` covers every CPU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub process_kernel: u64,
    pub process_user: u64,
    pub system_kernel: u64,
    pub system_user: u64,
    pub system_idle: u64,
    pub cpu_count: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryCounters {
    pub resident_bytes: u64,
    pub private_bytes: u64,
    pub virtual_bytes: u64,
}

pub trait ProcessAccounting {
    fn cpu_times() -> Result<CpuTimes>;
    fn memory() -> Result<MemoryCounters>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
mod unsupported;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
use unsupported as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

#[cfg(target_os = "linux")]
pub use linux::{parse_process_stat, parse_status_memory, parse_system_stat};

pub fn cpu_times() -> Result<CpuTimes> {
    platform_impl::Platform::cpu_times()
}

pub fn memory() -> Result<MemoryCounters> {
    platform_impl::Platform::memory()
}

/// Backend reading the OS accounting for the calling process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectSource;

impl DirectSource {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotSource for DirectSource {
    fn requires_identity(&self) -> bool {
        false
    }

    fn query(&self, _identity: Option<&CounterIdentity>) -> Result<Snapshot> {
        #[cfg(feature = "perf-tracing")]
        let _query_span = tracing::debug_span!("source.query", backend = "direct").entered();

        let times = cpu_times()?;
        let mem = memory()?;
        Ok(Snapshot {
            timestamp: Instant::now(),
            process_kernel_ticks: times.process_kernel,
            process_user_ticks: times.process_user,
            system_kernel_ticks: times.system_kernel,
            system_user_ticks: times.system_user,
            system_idle_ticks: times.system_idle,
            resident_bytes: mem.resident_bytes,
            private_bytes: mem.private_bytes,
            virtual_bytes: mem.virtual_bytes,
            resolved_pid: std::process::id(),
            cpu_count: times.cpu_count.max(1),
            reported_cpu_percent: None,
        })
    }
}
