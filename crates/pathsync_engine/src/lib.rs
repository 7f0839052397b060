//! Pathsync engine: push connection, pulls, telemetry delivery and the
//! session driver that executes core effects.
mod api;
mod auth;
mod backoff;
mod connection;
mod persist;
mod poll;
mod queue;
mod session;
mod settings;
mod sse;
mod store;
mod telemetry;
mod types;

pub use api::{EntitySource, HttpApi, JobSource, TelemetrySink};
pub use auth::{CredentialProvider, StaticToken};
pub use connection::{ConnectionEvent, ConnectionManager, MessageStream, Transport};
pub use persist::{ensure_state_dir, AtomicFileWriter, PersistError};
pub use queue::{LifecycleHook, TelemetryQueue};
pub use session::{Collaborators, SyncSession};
pub use settings::{BackoffSettings, FetchSettings, SessionSettings, TelemetrySettings};
pub use sse::SseTransport;
pub use store::{FileTelemetryStore, MemoryTelemetryStore, TelemetryStore};
pub use telemetry::{logical_id, TelemetryEvent, DEDUPED_TYPES, SCHEMA_VERSION};
pub use types::{
    ConnectionError, FailureKind, FetchError, JobId, TelemetryError, TransportError,
};
