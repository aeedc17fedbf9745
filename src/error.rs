use std::io;

/// Failure modes of a usage read.
///
/// `InstanceMissing` is the "candidate not present" signal the identity
/// resolver uses to move on to the next index. Every other variant reaches the
/// caller of `read_usage` unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("no counter instance of `{base}` matched pid {pid} after {attempts} attempts")]
    NotFound {
        base: String,
        pid: u32,
        attempts: u32,
    },

    #[error("unable to parse counter data: {0}")]
    Parse(String),

    #[error("counter backend failed: {0}")]
    Backend(String),

    #[error("counter instance `{0}` is not present")]
    InstanceMissing(String),
}

impl SampleError {
    pub fn is_instance_missing(&self) -> bool {
        matches!(self, SampleError::InstanceMissing(_))
    }
}

impl From<io::Error> for SampleError {
    fn from(err: io::Error) -> Self {
        SampleError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SampleError>;
