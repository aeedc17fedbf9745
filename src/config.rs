use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::source::typeperf::{DEFAULT_COMMAND, DEFAULT_QUERY_TIMEOUT};
use crate::usage::engine::DEFAULT_MIN_REFRESH_INTERVAL;
use crate::usage::resolver::DEFAULT_MAX_RESOLUTION_ATTEMPTS;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub resolver: ResolverConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub min_refresh_interval_ms: u64,
    pub cpu_scale: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            min_refresh_interval_ms: DEFAULT_MIN_REFRESH_INTERVAL.as_millis() as u64,
            cpu_scale: "machine".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_resolution_attempts: u32,
    /// Empty means the running executable's file stem.
    pub base_instance_name: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            max_resolution_attempts: DEFAULT_MAX_RESOLUTION_ATTEMPTS,
            base_instance_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: String,
    pub command: String,
    pub query_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: "direct".to_string(),
            command: DEFAULT_COMMAND.to_string(),
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("procusage").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}
