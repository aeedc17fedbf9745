use std::time::{Instant, SystemTime};

use serde::Serialize;

/// One point-in-time read of cumulative CPU ticks and instantaneous memory.
///
/// System kernel ticks include idle time, so `kernel + user` is the total CPU
/// time elapsed across all `cpu_count` CPUs. Tick units are backend-specific
/// but consistent within one backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub timestamp: Instant,
    pub process_kernel_ticks: u64,
    pub process_user_ticks: u64,
    pub system_kernel_ticks: u64,
    pub system_user_ticks: u64,
    pub system_idle_ticks: u64,
    pub resident_bytes: u64,
    pub private_bytes: u64,
    pub virtual_bytes: u64,
    pub resolved_pid: u32,
    pub cpu_count: u32,
    /// Per-CPU percentage for backends that report a formatted value instead
    /// of cumulative ticks.
    pub reported_cpu_percent: Option<f64>,
}

impl Snapshot {
    pub fn process_ticks(&self) -> u64 {
        self.process_kernel_ticks
            .saturating_add(self.process_user_ticks)
    }

    pub fn system_ticks(&self) -> u64 {
        self.system_kernel_ticks.saturating_add(self.system_user_ticks)
    }
}

/// A guess at which counter-namespace entry belongs to a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterIdentity {
    pub name: String,
    pub resolved_pid: u32,
}

impl CounterIdentity {
    pub fn candidate(base: &str, index: u32) -> String {
        format!("{base}#{index}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UsageReading {
    pub cpu_percent: f64,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub sampled_at: SystemTime,
}

/// Denominator used for `cpu_percent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuScale {
    /// 100% means every CPU on the machine is busy.
    #[default]
    Machine,
    /// 100% means one CPU is busy; the ceiling is `100 * cpu_count`.
    Core,
}

impl CpuScale {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "machine" | "total" => Some(CpuScale::Machine),
            "core" | "cpu" => Some(CpuScale::Core),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CpuScale::Machine => "machine",
            CpuScale::Core => "core",
        }
    }

    pub fn ceiling(self, cpu_count: u32) -> f64 {
        match self {
            CpuScale::Machine => 100.0,
            CpuScale::Core => 100.0 * f64::from(cpu_count.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_names_carry_the_index() {
        assert_eq!(CounterIdentity::candidate("gnatsd", 0), "gnatsd#0");
        assert_eq!(CounterIdentity::candidate("gnatsd", 12), "gnatsd#12");
    }

    #[test]
    fn scale_names() {
        assert_eq!(CpuScale::from_name("Machine"), Some(CpuScale::Machine));
        assert_eq!(CpuScale::from_name(" core "), Some(CpuScale::Core));
        assert_eq!(CpuScale::from_name("bogus"), None);
        assert_eq!(CpuScale::Core.ceiling(4), 400.0);
        assert_eq!(CpuScale::Core.ceiling(0), 100.0);
        assert_eq!(CpuScale::Machine.ceiling(8), 100.0);
    }
}
