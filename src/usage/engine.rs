use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use super::snapshot::{CpuScale, Snapshot, UsageReading};
use crate::error::Result;

pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct EngineState {
    previous: Option<Snapshot>,
    last_sample: Option<Instant>,
    last_reading: Option<UsageReading>,
}

/// Turns successive cumulative snapshots into CPU percentages.
///
/// The lock only covers the read-modify-write of the cached triple; fetching a
/// snapshot happens outside it, so racing callers may both hit the backend.
#[derive(Debug)]
pub struct DeltaEngine {
    min_refresh_interval: Duration,
    scale: CpuScale,
    state: Mutex<EngineState>,
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REFRESH_INTERVAL, CpuScale::default())
    }
}

impl DeltaEngine {
    pub fn new(min_refresh_interval: Duration, scale: CpuScale) -> Self {
        Self {
            min_refresh_interval,
            scale,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    pub fn scale(&self) -> CpuScale {
        self.scale
    }

    pub fn last_reading(&self) -> Option<UsageReading> {
        self.lock().last_reading
    }

    /// False while a reading exists and the throttle window has not elapsed.
    pub fn should_refresh(&self, now: Instant) -> bool {
        self.throttled(now).is_none()
    }

    /// Throttle, fetch, update. `fetch` runs without the engine lock held.
    pub fn sample<F>(&self, now: Instant, fetch: F) -> Result<UsageReading>
    where
        F: FnOnce() -> Result<Snapshot>,
    {
        if let Some(reading) = self.throttled(now) {
            #[cfg(feature = "perf-tracing")]
            tracing::debug!("engine.throttled");
            return Ok(reading);
        }

        match fetch() {
            Ok(snapshot) => Ok(self.update(snapshot)),
            Err(err) => {
                // Keep the baseline but start a new window so a failing
                // backend is not retried on every call.
                self.lock().last_sample = Some(now);
                Err(err)
            }
        }
    }

    /// Folds `current` into the engine and returns the resulting reading.
    ///
    /// The first snapshot only establishes a baseline and reports 0% CPU. A
    /// snapshot whose clock or system ticks did not advance returns the
    /// previous reading unchanged.
    pub fn update(&self, current: Snapshot) -> UsageReading {
        let mut state = self.lock();

        let reading = match (state.previous.as_ref(), state.last_reading) {
            (Some(previous), Some(last)) => match self.cpu_percent(previous, &current) {
                Some(cpu_percent) => reading_from(&current, cpu_percent),
                None => {
                    #[cfg(feature = "perf-tracing")]
                    tracing::debug!(
                        previous_ticks = previous.system_ticks(),
                        current_ticks = current.system_ticks(),
                        "engine.degenerate_delta"
                    );
                    last
                }
            },
            _ => reading_from(&current, 0.0),
        };

        state.last_sample = Some(current.timestamp);
        state.previous = Some(current);
        state.last_reading = Some(reading);
        reading
    }

    fn throttled(&self, now: Instant) -> Option<UsageReading> {
        let state = self.lock();
        let reading = state.last_reading?;
        let last = state.last_sample?;
        if now.saturating_duration_since(last) < self.min_refresh_interval {
            Some(reading)
        } else {
            None
        }
    }

    fn cpu_percent(&self, previous: &Snapshot, current: &Snapshot) -> Option<f64> {
        if current.timestamp <= previous.timestamp {
            return None;
        }
        let cpus = f64::from(current.cpu_count.max(1));

        let raw = match current.reported_cpu_percent {
            Some(per_core) if per_core.is_finite() => match self.scale {
                CpuScale::Core => per_core,
                CpuScale::Machine => per_core / cpus,
            },
            Some(_) => return None,
            None => {
                let sys_delta = current
                    .system_ticks()
                    .checked_sub(previous.system_ticks())
                    .filter(|delta| *delta > 0)?;
                let proc_delta = current
                    .process_ticks()
                    .saturating_sub(previous.process_ticks());
                let machine = 100.0 * proc_delta as f64 / sys_delta as f64;
                match self.scale {
                    CpuScale::Machine => machine,
                    CpuScale::Core => machine * cpus,
                }
            }
        };

        Some(raw.clamp(0.0, self.scale.ceiling(current.cpu_count)))
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reading_from(snapshot: &Snapshot, cpu_percent: f64) -> UsageReading {
    UsageReading {
        cpu_percent,
        resident_bytes: snapshot.resident_bytes,
        virtual_bytes: snapshot.virtual_bytes,
        sampled_at: SystemTime::now(),
    }
}
