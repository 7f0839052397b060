use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchSnapshot { job_id: JobId },
    StartPolling { job_id: JobId },
    StopPolling { job_id: JobId },
    FetchEntity { job_id: JobId, entity_id: String },
    ReloadCollection,
    /// Bring channel subscriptions up to date on a freshly opened connection.
    Resubscribe,
}
