#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use procusage::error::{Result, SampleError};
use procusage::source::SnapshotSource;
use procusage::usage::{CounterIdentity, Snapshot};

pub const PROC_TICKS_PER_QUERY: u64 = 25;
pub const SYS_TICKS_PER_QUERY: u64 = 100;

/// In-memory counter namespace.
///
/// Every query advances the clock by one second and the counters by a fixed
/// amount, so each live refresh after the first reads 25% CPU.
pub struct FakeCounters {
    requires_identity: bool,
    entries: Mutex<HashMap<String, u32>>,
    own_pid: u32,
    queries: AtomicUsize,
    failing: AtomicBool,
    origin: Instant,
}

impl FakeCounters {
    /// A backend that samples "self" and always reports `own_pid`.
    pub fn direct(own_pid: u32) -> Self {
        Self::build(false, &[], own_pid)
    }

    /// A backend addressed by instance name.
    pub fn named(entries: &[(&str, u32)]) -> Self {
        Self::build(true, entries, 0)
    }

    fn build(requires_identity: bool, entries: &[(&str, u32)], own_pid: u32) -> Self {
        FakeCounters {
            requires_identity,
            entries: Mutex::new(
                entries
                    .iter()
                    .map(|(name, pid)| (name.to_string(), *pid))
                    .collect(),
            ),
            own_pid,
            queries: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            origin: Instant::now(),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_queries(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Replaces the namespace, as if instances had started or stopped.
    pub fn set_entries(&self, entries: &[(&str, u32)]) {
        let mut map = self.entries.lock().unwrap();
        map.clear();
        for (name, pid) in entries {
            map.insert(name.to_string(), *pid);
        }
    }
}

impl SnapshotSource for FakeCounters {
    fn requires_identity(&self) -> bool {
        self.requires_identity
    }

    fn query(&self, identity: Option<&CounterIdentity>) -> Result<Snapshot> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(SampleError::Backend("fake backend is down".into()));
        }

        let pid = match identity {
            Some(identity) => *self
                .entries
                .lock()
                .unwrap()
                .get(&identity.name)
                .ok_or_else(|| SampleError::InstanceMissing(identity.name.clone()))?,
            None => self.own_pid,
        };

        Ok(snapshot_at(
            self.origin + Duration::from_secs(n),
            n * PROC_TICKS_PER_QUERY,
            n * SYS_TICKS_PER_QUERY,
            pid,
        ))
    }
}

pub fn snapshot_at(timestamp: Instant, proc_ticks: u64, sys_ticks: u64, pid: u32) -> Snapshot {
    Snapshot {
        timestamp,
        process_kernel_ticks: proc_ticks / 4,
        process_user_ticks: proc_ticks - proc_ticks / 4,
        system_kernel_ticks: sys_ticks / 2,
        system_user_ticks: sys_ticks - sys_ticks / 2,
        system_idle_ticks: sys_ticks / 4,
        resident_bytes: 32 * 1024 * 1024,
        private_bytes: 16 * 1024 * 1024,
        virtual_bytes: 512 * 1024 * 1024,
        resolved_pid: pid,
        cpu_count: 4,
        reported_cpu_percent: None,
    }
}
