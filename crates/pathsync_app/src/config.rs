//! RON configuration for the `pathsync` binary.
//!
//! Every field is optional; missing ones keep the engine defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pathsync_engine::{BackoffSettings, FetchSettings, SessionSettings, TelemetrySettings};
use serde::{Deserialize, Serialize};

use crate::logging::LogDestination;

pub const DEFAULT_CONFIG_FILE: &str = "pathsync.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base: String,
    pub identity: Option<String>,
    pub channels: Vec<String>,
    pub job_type: String,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub backoff: BackoffConfig,
    pub telemetry: TelemetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub flush_threshold: usize,
    pub batch_size: usize,
    pub max_entries: usize,
    pub max_age_hours: u64,
    pub dedupe_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub destination: LogDestination,
    pub file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let session = SessionSettings::new("http://localhost:8080/api");
        Self {
            api_base: session.api_base,
            identity: None,
            channels: Vec::new(),
            job_type: session.job_type,
            poll_interval_ms: millis(session.poll_interval),
            connect_timeout_ms: millis(session.fetch.connect_timeout),
            request_timeout_ms: millis(session.fetch.request_timeout),
            backoff: BackoffConfig::default(),
            telemetry: TelemetryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let defaults = BackoffSettings::default();
        Self {
            initial_ms: millis(defaults.initial),
            max_ms: millis(defaults.max),
            multiplier: defaults.multiplier,
            jitter: defaults.jitter,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let defaults = TelemetrySettings::default();
        Self {
            path: None,
            debounce_ms: millis(defaults.debounce),
            flush_threshold: defaults.flush_threshold,
            batch_size: defaults.batch_size,
            max_entries: defaults.max_entries,
            max_age_hours: defaults.max_age.as_secs() / 3_600,
            dedupe_ttl_secs: defaults.dedupe_ttl.as_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            destination: LogDestination::Terminal,
            file: PathBuf::from("./pathsync.log"),
        }
    }
}

impl AppConfig {
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::new(self.api_base.clone());
        settings.identity = self.identity.clone().filter(|id| !id.trim().is_empty());
        settings.channels = self.channels.clone();
        settings.job_type = self.job_type.clone();
        settings.poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));
        settings.fetch = FetchSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        };
        settings.backoff = BackoffSettings {
            initial: Duration::from_millis(self.backoff.initial_ms),
            max: Duration::from_millis(self.backoff.max_ms.max(self.backoff.initial_ms)),
            multiplier: self.backoff.multiplier,
            jitter: self.backoff.jitter.clamp(0.0, 1.0),
        };
        settings.telemetry = TelemetrySettings {
            debounce: Duration::from_millis(self.telemetry.debounce_ms),
            flush_threshold: self.telemetry.flush_threshold.max(1),
            batch_size: self.telemetry.batch_size.max(1),
            max_entries: self.telemetry.max_entries,
            max_age: Duration::from_secs(self.telemetry.max_age_hours * 3_600),
            dedupe_ttl: Duration::from_secs(self.telemetry.dedupe_ttl_secs),
        };
        settings.telemetry_path = self.telemetry.path.clone();
        settings
    }
}

/// Reads the config at `explicit`, or `pathsync.ron` in the working
/// directory when present. Only an explicit path is required to exist.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(AppConfig::default());
            }
            default
        }
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse(&content).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse(content: &str) -> Result<AppConfig> {
    Ok(ron::from_str(content)?)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
