use crate::{ConnectionStatus, JobId, JobSnapshot, PathEntity, PushMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// A job-creating action was issued locally.
    JobStarted {
        job_id: JobId,
        title: Option<String>,
    },
    /// A view mounted or the user selected a job.
    TrackJob { job_id: JobId },
    /// User dismissed a failed or canceled job.
    DismissJob { job_id: JobId },
    /// Raw message from the push channel.
    PushReceived(PushMessage),
    /// Pull snapshot for a job (activation, reconnect or poll).
    SnapshotLoaded(JobSnapshot),
    SnapshotFailed { job_id: JobId, error: String },
    /// Canonical entity fetched after a job succeeded.
    EntityLoaded { job_id: JobId, entity: PathEntity },
    EntityLoadFailed { job_id: JobId, error: String },
    /// Full entity collection (initial load or fallback reload).
    CollectionLoaded(Vec<PathEntity>),
    CollectionLoadFailed { error: String },
    /// Push connection status changed.
    ConnectionChanged(ConnectionStatus),
    /// Push messages were dropped before reaching the reducer.
    PushGap,
    /// Fallback for placeholder wiring.
    NoOp,
}
