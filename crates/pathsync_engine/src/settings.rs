use std::path::PathBuf;
use std::time::Duration;

use pathsync_core::LEARNING_BUILD;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reconnect delay policy: `initial * multiplier^attempt`, capped at `max`,
/// spread by `±jitter` (a fraction of the delay).
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSettings {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl BackoffSettings {
    /// Same delay on every attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySettings {
    /// Quiet period after the last `queue` before a flush.
    pub debounce: Duration,
    /// Buffer size that triggers an immediate flush.
    pub flush_threshold: usize,
    pub batch_size: usize,
    pub max_entries: usize,
    /// Persisted events older than this are dropped on restore.
    pub max_age: Duration,
    pub dedupe_ttl: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            flush_threshold: 50,
            batch_size: 200,
            max_entries: 1_000,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            dedupe_ttl: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub api_base: String,
    /// Channel identity push messages must carry to be considered ours.
    pub identity: Option<String>,
    /// Channels subscribed whenever the push connection opens.
    pub channels: Vec<String>,
    pub job_type: String,
    pub poll_interval: Duration,
    pub fetch: FetchSettings,
    pub backoff: BackoffSettings,
    pub telemetry: TelemetrySettings,
    /// Where the telemetry buffer is persisted; in-memory only when `None`.
    pub telemetry_path: Option<PathBuf>,
}

impl SessionSettings {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            identity: None,
            channels: Vec::new(),
            job_type: LEARNING_BUILD.to_string(),
            poll_interval: Duration::from_secs(4),
            fetch: FetchSettings::default(),
            backoff: BackoffSettings::default(),
            telemetry: TelemetrySettings::default(),
            telemetry_path: None,
        }
    }
}
