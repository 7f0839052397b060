use crate::{ConnectionStatus, EntityRow, FeedEntry, JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncViewModel {
    pub connection: ConnectionStatus,
    pub jobs: Vec<JobRowView>,
    pub entities: Vec<EntityRow>,
    pub feed: Vec<FeedEntry>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRowView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage_label: String,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}
