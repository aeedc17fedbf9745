use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::SnapshotSource;
use crate::error::{Result, SampleError};
use crate::usage::snapshot::{CounterIdentity, Snapshot};

struct Handle {
    sys: System,
    primed_at: Instant,
}

/// Backend built on `sysinfo`'s process table.
///
/// The `System` is primed once on construction and refreshed for our own pid
/// on every query. Process time is sysinfo's accumulated CPU time in
/// milliseconds; the system side is wall-clock milliseconds since priming
/// times the CPU count, which gives the engine a total-capacity denominator in
/// the same unit.
pub struct SysinfoSource {
    pid: Pid,
    cpu_count: u32,
    handle: Mutex<Handle>,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let cpu_count = (sys.cpus().len() as u32).max(1);
        SysinfoSource {
            pid,
            cpu_count,
            handle: Mutex::new(Handle {
                sys,
                primed_at: Instant::now(),
            }),
        }
    }
}

impl SnapshotSource for SysinfoSource {
    fn requires_identity(&self) -> bool {
        false
    }

    fn query(&self, _identity: Option<&CounterIdentity>) -> Result<Snapshot> {
        #[cfg(feature = "perf-tracing")]
        let _query_span = tracing::debug_span!("source.query", backend = "sysinfo").entered();

        // The System handle is stateful and not shareable mid-refresh.
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let now = Instant::now();
        let process = handle
            .sys
            .process(self.pid)
            .ok_or_else(|| SampleError::Backend(format!("pid {} missing from sysinfo", self.pid)))?;

        let elapsed_ms = now.saturating_duration_since(handle.primed_at).as_millis() as u64;

        Ok(Snapshot {
            timestamp: now,
            process_kernel_ticks: 0,
            process_user_ticks: process.accumulated_cpu_time(),
            system_kernel_ticks: 0,
            system_user_ticks: elapsed_ms.saturating_mul(u64::from(self.cpu_count)),
            system_idle_ticks: 0,
            resident_bytes: process.memory(),
            private_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            resolved_pid: self.pid.as_u32(),
            cpu_count: self.cpu_count,
            reported_cpu_percent: None,
        })
    }
}
