use super::{CpuTimes, MemoryCounters, ProcessAccounting};
use crate::error::{Result, SampleError};
use crate::source::available_cpus;

use windows_sys::Win32::{
    Foundation::FILETIME,
    System::{
        ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS, PROCESS_MEMORY_COUNTERS_EX},
        Threading::{GetCurrentProcess, GetProcessTimes, GetSystemTimes},
    },
};

pub struct Platform;

impl ProcessAccounting for Platform {
    fn cpu_times() -> Result<CpuTimes> {
        let zero = FILETIME {
            dwLowDateTime: 0,
            dwHighDateTime: 0,
        };
        let (mut created, mut exited, mut p_kernel, mut p_user) = (zero, zero, zero, zero);
        let (mut s_idle, mut s_kernel, mut s_user) = (zero, zero, zero);

        // GetCurrentProcess returns a pseudo-handle that needs no closing.
        let ok = unsafe {
            GetProcessTimes(
                GetCurrentProcess(),
                &mut created,
                &mut exited,
                &mut p_kernel,
                &mut p_user,
            )
        };
        if ok == 0 {
            return Err(last_error("GetProcessTimes"));
        }

        let ok = unsafe { GetSystemTimes(&mut s_idle, &mut s_kernel, &mut s_user) };
        if ok == 0 {
            return Err(last_error("GetSystemTimes"));
        }

        // System kernel time already includes idle time.
        Ok(CpuTimes {
            process_kernel: filetime_ticks(&p_kernel),
            process_user: filetime_ticks(&p_user),
            system_kernel: filetime_ticks(&s_kernel),
            system_user: filetime_ticks(&s_user),
            system_idle: filetime_ticks(&s_idle),
            cpu_count: available_cpus(),
        })
    }

    fn memory() -> Result<MemoryCounters> {
        let mut counters = unsafe { std::mem::zeroed::<PROCESS_MEMORY_COUNTERS_EX>() };
        counters.cb = std::mem::size_of::<PROCESS_MEMORY_COUNTERS_EX>() as u32;
        let ok = unsafe {
            GetProcessMemoryInfo(
                GetCurrentProcess(),
                &mut counters as *mut PROCESS_MEMORY_COUNTERS_EX as *mut PROCESS_MEMORY_COUNTERS,
                counters.cb,
            )
        };
        if ok == 0 {
            return Err(last_error("GetProcessMemoryInfo"));
        }

        // PrivateUsage is the commit charge, the closest thing to a VSZ that
        // the memory counters expose.
        Ok(MemoryCounters {
            resident_bytes: counters.WorkingSetSize as u64,
            private_bytes: counters.PrivateUsage as u64,
            virtual_bytes: counters.PrivateUsage as u64,
        })
    }
}

/// FILETIME values count 100ns intervals.
fn filetime_ticks(ft: &FILETIME) -> u64 {
    (u64::from(ft.dwHighDateTime) << 32) | u64::from(ft.dwLowDateTime)
}

fn last_error(call: &str) -> SampleError {
    SampleError::Backend(format!("{call} failed: {}", std::io::Error::last_os_error()))
}
