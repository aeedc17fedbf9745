use std::sync::{Mutex, PoisonError};

use super::snapshot::{CounterIdentity, Snapshot};
use crate::error::{Result, SampleError};
use crate::source::SnapshotSource;

pub const DEFAULT_MAX_RESOLUTION_ATTEMPTS: u32 = 128;

/// Identity that matched, plus the snapshot read while matching it.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub identity: CounterIdentity,
    pub snapshot: Snapshot,
}

/// Maps a pid to a `base#index` counter instance.
///
/// Instances of the same image are numbered in registration order, and the
/// numbering shifts as other instances start and stop, so a cached name is
/// only trusted while it keeps resolving to our pid.
#[derive(Debug)]
pub struct IdentityResolver {
    base_name: String,
    max_attempts: u32,
    cached: Mutex<Option<CounterIdentity>>,
}

impl IdentityResolver {
    pub fn new(base_name: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            base_name: base_name.into(),
            max_attempts: max_attempts.max(1),
            cached: Mutex::new(None),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn cached(&self) -> Option<CounterIdentity> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Finds the instance backing `own_pid`, trying the cached name first.
    ///
    /// A cached name that now reports another pid, or no longer exists, is
    /// dropped and the namespace is enumerated once more.
    pub fn resolve(&self, source: &dyn SnapshotSource, own_pid: u32) -> Result<Resolution> {
        #[cfg(feature = "perf-tracing")]
        let _resolve_span = tracing::debug_span!("resolver.resolve", own_pid).entered();

        if let Some(identity) = self.cached() {
            match source.query(Some(&identity)) {
                Ok(snapshot) if snapshot.resolved_pid == own_pid => {
                    return Ok(Resolution { identity, snapshot });
                }
                Ok(_snapshot) => {
                    #[cfg(feature = "perf-tracing")]
                    tracing::debug!(
                        name = %identity.name,
                        reported_pid = _snapshot.resolved_pid,
                        "resolver.stale_identity"
                    );
                }
                Err(err) if err.is_instance_missing() => {
                    #[cfg(feature = "perf-tracing")]
                    tracing::debug!(name = %identity.name, "resolver.instance_gone");
                }
                Err(err) => return Err(err),
            }
            self.invalidate();
        }

        self.enumerate(source, own_pid)
    }

    fn enumerate(&self, source: &dyn SnapshotSource, own_pid: u32) -> Result<Resolution> {
        for index in 0..self.max_attempts {
            let mut identity = CounterIdentity {
                name: CounterIdentity::candidate(&self.base_name, index),
                resolved_pid: 0,
            };

            let snapshot = match source.query(Some(&identity)) {
                Ok(snapshot) => snapshot,
                Err(err) if err.is_instance_missing() => continue,
                Err(err) => return Err(err),
            };
            if snapshot.resolved_pid != own_pid {
                continue;
            }

            identity.resolved_pid = snapshot.resolved_pid;
            *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());

            #[cfg(feature = "perf-tracing")]
            tracing::debug!(name = %identity.name, attempts = index + 1, "resolver.cached");

            return Ok(Resolution { identity, snapshot });
        }

        Err(SampleError::NotFound {
            base: self.base_name.clone(),
            pid: own_pid,
            attempts: self.max_attempts,
        })
    }
}
