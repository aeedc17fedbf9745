use super::{CpuTimes, MemoryCounters, ProcessAccounting};
use crate::error::{Result, SampleError};

pub struct Platform;

impl ProcessAccounting for Platform {
    fn cpu_times() -> Result<CpuTimes> {
        // Both files count in USER_HZ ticks, so no unit conversion is needed.
        let (process_kernel, process_user) =
            parse_process_stat(&std::fs::read_to_string("/proc/self/stat")?)?;
        let system = parse_system_stat(&std::fs::read_to_string("/proc/stat")?)?;
        Ok(CpuTimes {
            process_kernel,
            process_user,
            ..system
        })
    }

    fn memory() -> Result<MemoryCounters> {
        parse_status_memory(&std::fs::read_to_string("/proc/self/status")?)
    }
}

/// Returns `(stime, utime)` from a `/proc/<pid>/stat` line.
pub fn parse_process_stat(contents: &str) -> Result<(u64, u64)> {
    // comm may contain spaces and parens, so split after the last ')'
    let after_comm = contents
        .rfind(')')
        .map(|i| &contents[i + 1..])
        .ok_or_else(|| SampleError::Parse("stat line has no comm field".into()))?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // state(0) ppid(1) pgrp(2) session(3) tty_nr(4) tpgid(5) flags(6)
    // minflt(7) cminflt(8) majflt(9) cmajflt(10) utime(11) stime(12)
    let utime = stat_field(&fields, 11, "utime")?;
    let stime = stat_field(&fields, 12, "stime")?;
    Ok((stime, utime))
}

/// Reads the aggregate `cpu` line of `/proc/stat`.
///
/// Kernel time is folded together with idle and iowait so that kernel plus
/// user spans all elapsed CPU time. Guest time is already part of user time.
pub fn parse_system_stat(contents: &str) -> Result<CpuTimes> {
    let mut aggregate = None;
    let mut cpu_count = 0u32;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu ") {
            aggregate = Some(rest);
        } else if let Some(rest) = line.strip_prefix("cpu")
            && rest.starts_with(|c: char| c.is_ascii_digit())
        {
            cpu_count += 1;
        }
    }

    let rest = aggregate.ok_or_else(|| SampleError::Parse("no aggregate cpu line".into()))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let user = stat_field(&fields, 0, "user")?;
    let nice = stat_field(&fields, 1, "nice")?;
    let system = stat_field(&fields, 2, "system")?;
    let idle = stat_field(&fields, 3, "idle")?;
    let iowait = trailing_field(&fields, 4, "iowait")?;
    let irq = trailing_field(&fields, 5, "irq")?;
    let softirq = trailing_field(&fields, 6, "softirq")?;
    let steal = trailing_field(&fields, 7, "steal")?;

    let idle_total = idle + iowait;
    Ok(CpuTimes {
        process_kernel: 0,
        process_user: 0,
        system_kernel: system + irq + softirq + steal + idle_total,
        system_user: user + nice,
        system_idle: idle_total,
        cpu_count: cpu_count.max(1),
    })
}

/// Reads `VmRSS`, `RssAnon` and `VmSize` (kB) from `/proc/<pid>/status`.
pub fn parse_status_memory(contents: &str) -> Result<MemoryCounters> {
    let mut rss = None;
    let mut anon = None;
    let mut size = None;
    for line in contents.lines() {
        if let Some(val) = line.strip_prefix("VmRSS:") {
            rss = kilobytes(val);
        } else if let Some(val) = line.strip_prefix("RssAnon:") {
            anon = kilobytes(val);
        } else if let Some(val) = line.strip_prefix("VmSize:") {
            size = kilobytes(val);
        }
    }

    let resident_bytes = rss.ok_or_else(|| SampleError::Parse("status has no VmRSS".into()))?;
    let virtual_bytes = size.ok_or_else(|| SampleError::Parse("status has no VmSize".into()))?;
    Ok(MemoryCounters {
        resident_bytes,
        private_bytes: anon.unwrap_or(resident_bytes),
        virtual_bytes,
    })
}

fn stat_field(fields: &[&str], idx: usize, name: &str) -> Result<u64> {
    let raw = fields
        .get(idx)
        .ok_or_else(|| SampleError::Parse(format!("missing {name} field")))?;
    raw.parse()
        .map_err(|_| SampleError::Parse(format!("unable to parse {name}: {raw}")))
}

// Older kernels stop after idle; a field that is present must still parse.
fn trailing_field(fields: &[&str], idx: usize, name: &str) -> Result<u64> {
    if idx >= fields.len() {
        return Ok(0);
    }
    stat_field(fields, idx, name)
}

fn kilobytes(val: &str) -> Option<u64> {
    let kb: u64 = val.trim().trim_end_matches("kB").trim().parse().ok()?;
    Some(kb * 1024)
}
