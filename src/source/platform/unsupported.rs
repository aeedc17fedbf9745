use super::{CpuTimes, MemoryCounters, ProcessAccounting};
use crate::error::{Result, SampleError};

pub struct Platform;

impl ProcessAccounting for Platform {
    fn cpu_times() -> Result<CpuTimes> {
        Err(unsupported())
    }

    fn memory() -> Result<MemoryCounters> {
        Err(unsupported())
    }
}

fn unsupported() -> SampleError {
    SampleError::Backend(format!(
        "direct process accounting is not available on {}",
        std::env::consts::OS
    ))
}
