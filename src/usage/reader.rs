use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::engine::{DEFAULT_MIN_REFRESH_INTERVAL, DeltaEngine};
use super::resolver::{DEFAULT_MAX_RESOLUTION_ATTEMPTS, IdentityResolver};
use super::snapshot::{CounterIdentity, CpuScale, Snapshot, UsageReading};
use crate::config::{Config, load_config};
use crate::error::Result;
use crate::source::{SnapshotSource, build_source};

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub min_refresh_interval: Duration,
    pub max_resolution_attempts: u32,
    pub base_instance_name: String,
    pub cpu_scale: CpuScale,
    pub own_pid: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            max_resolution_attempts: DEFAULT_MAX_RESOLUTION_ATTEMPTS,
            base_instance_name: default_instance_name(),
            cpu_scale: CpuScale::default(),
            own_pid: std::process::id(),
        }
    }
}

impl ReaderOptions {
    pub fn from_config(config: &Config) -> Self {
        let base = config.resolver.base_instance_name.trim();
        ReaderOptions {
            min_refresh_interval: Duration::from_millis(config.sampling.min_refresh_interval_ms),
            max_resolution_attempts: config.resolver.max_resolution_attempts,
            base_instance_name: if base.is_empty() {
                default_instance_name()
            } else {
                base.to_string()
            },
            cpu_scale: CpuScale::from_name(&config.sampling.cpu_scale).unwrap_or_default(),
            own_pid: std::process::id(),
        }
    }
}

/// Counter instances are named after the executable image, without extension.
pub fn default_instance_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// Entry point composing a snapshot source, the identity resolver and the
/// delta engine.
pub struct UsageReader {
    source: Arc<dyn SnapshotSource>,
    resolver: IdentityResolver,
    engine: DeltaEngine,
    own_pid: u32,
}

impl UsageReader {
    pub fn new(source: Arc<dyn SnapshotSource>, options: ReaderOptions) -> Self {
        UsageReader {
            source,
            resolver: IdentityResolver::new(
                options.base_instance_name,
                options.max_resolution_attempts,
            ),
            engine: DeltaEngine::new(options.min_refresh_interval, options.cpu_scale),
            own_pid: options.own_pid,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            build_source(&config.backend),
            ReaderOptions::from_config(config),
        )
    }

    /// Current CPU percentage and memory sizes of this process.
    ///
    /// Within the throttle window the previous reading is returned without
    /// touching the backend. The first live read reports 0% CPU.
    pub fn read_usage(&self) -> Result<UsageReading> {
        #[cfg(feature = "perf-tracing")]
        let _read_span = tracing::debug_span!("reader.read_usage").entered();

        self.engine.sample(Instant::now(), || self.fetch())
    }

    pub fn identity(&self) -> Option<CounterIdentity> {
        self.resolver.cached()
    }

    pub fn engine(&self) -> &DeltaEngine {
        &self.engine
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    fn fetch(&self) -> Result<Snapshot> {
        if !self.source.requires_identity() {
            return self.source.query(None);
        }
        // The resolver re-resolves a stale cached name before returning, so
        // the snapshot always belongs to our pid.
        let resolution = self.resolver.resolve(self.source.as_ref(), self.own_pid)?;
        Ok(resolution.snapshot)
    }
}

static GLOBAL_READER: OnceLock<UsageReader> = OnceLock::new();

/// The process-wide reader, built from the user config on first use.
pub fn global_reader() -> &'static UsageReader {
    GLOBAL_READER.get_or_init(|| UsageReader::from_config(&load_config()))
}

/// Shorthand for `global_reader().read_usage()`.
pub fn read_usage() -> Result<UsageReading> {
    global_reader().read_usage()
}
