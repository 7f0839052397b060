use std::fmt;

use thiserror::Error;

pub use pathsync_core::JobId;

/// Failure of a pull request (snapshot, entity, delivery, subscription).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    Unauthorized,
    HttpStatus(u16),
    Timeout,
    Decode,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::Unauthorized => write!(f, "unauthorized"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Decode => write!(f, "undecodable response"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push stream request failed: {0}")]
    Request(#[from] FetchError),
    #[error("push stream closed by server")]
    Closed,
    #[error("push stream read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("push channel is not connected")]
    NotConnected,
    #[error("no credential available")]
    NoCredential,
    #[error("channel request failed: {0}")]
    Remote(#[from] FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("telemetry delivery failed: {0}")]
    Delivery(#[from] FetchError),
    #[error("a flush is already running")]
    FlushInProgress,
}
