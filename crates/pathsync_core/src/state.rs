use std::collections::BTreeMap;

use crate::entity::{placeholder_id, EntityCollection, EntityRow, Placeholder};
use crate::job::{stage_label, JobId, JobRecord, LEARNING_BUILD};
use crate::view_model::{JobRowView, SyncViewModel};

/// Oldest progress-feed entries are dropped past this many.
pub const FEED_LIMIT: usize = 200;

const DEFAULT_TITLE: &str = "New learning path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Retrying,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Open
    }
}

/// How a tracked job is waiting to be resolved into its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    InFlight,
    AwaitingEntity,
    AwaitingReload,
    /// Failed or canceled; kept until dismissed.
    Settled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub record: JobRecord,
    pub resolution: Resolution,
    pub(crate) last_feed_key: Option<(String, u8)>,
}

/// One line of the progress feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub job_id: JobId,
    pub stage: String,
    pub progress: u8,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    job_type: String,
    identity: Option<String>,
    connection: ConnectionStatus,
    has_connected: bool,
    jobs: BTreeMap<JobId, TrackedJob>,
    entities: EntityCollection,
    feed: Vec<FeedEntry>,
    dirty: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(LEARNING_BUILD, None)
    }
}

impl SyncState {
    pub fn new(job_type: impl Into<String>, identity: Option<String>) -> Self {
        Self {
            job_type: job_type.into(),
            identity,
            connection: ConnectionStatus::Disconnected,
            has_connected: false,
            jobs: BTreeMap::new(),
            entities: EntityCollection::new(),
            feed: Vec::new(),
            dirty: false,
        }
    }

    pub fn view(&self) -> SyncViewModel {
        SyncViewModel {
            connection: self.connection,
            jobs: self
                .jobs
                .values()
                .map(|tracked| {
                    let record = &tracked.record;
                    JobRowView {
                        job_id: record.id.clone(),
                        status: record.status,
                        stage_label: stage_label(record.stage.as_deref()).to_string(),
                        progress: record.progress,
                        message: record.message.clone(),
                        error: record.error.clone(),
                    }
                })
                .collect(),
            entities: self.entities.rows().to_vec(),
            feed: self.feed.clone(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call, and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn job(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id).map(|tracked| &tracked.record)
    }

    pub fn tracked(&self, job_id: &str) -> Option<&TrackedJob> {
        self.jobs.get(job_id)
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn entities(&self) -> &EntityCollection {
        &self.entities
    }

    pub fn feed(&self) -> &[FeedEntry] {
        &self.feed
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Records the new status; returns false when it did not change.
    pub(crate) fn set_connection(&mut self, status: ConnectionStatus) -> bool {
        if self.connection == status {
            return false;
        }
        self.connection = status;
        self.mark_dirty();
        true
    }

    /// Returns whether the connection had been open before.
    pub(crate) fn note_opened(&mut self) -> bool {
        std::mem::replace(&mut self.has_connected, true)
    }

    /// Starts tracking `job_id` with a fresh queued record and its placeholder.
    pub(crate) fn activate(&mut self, job_id: &str, title: Option<String>) {
        let record = JobRecord::new(job_id, self.job_type.clone());
        let title = title.unwrap_or_else(|| DEFAULT_TITLE.to_string());
        self.entities
            .upsert(EntityRow::Placeholder(Placeholder::for_record(&record, title)));
        self.jobs.insert(
            job_id.to_string(),
            TrackedJob {
                record,
                resolution: Resolution::InFlight,
                last_feed_key: None,
            },
        );
        self.mark_dirty();
    }

    pub(crate) fn tracked_mut(&mut self, job_id: &str) -> Option<&mut TrackedJob> {
        self.jobs.get_mut(job_id)
    }

    /// Drops the job record; the placeholder is left to the caller.
    pub(crate) fn discard(&mut self, job_id: &str) -> Option<TrackedJob> {
        let removed = self.jobs.remove(job_id);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    pub(crate) fn entities_mut(&mut self) -> &mut EntityCollection {
        &mut self.entities
    }

    pub(crate) fn sync_placeholder(&mut self, job_id: &str) {
        let Some(tracked) = self.jobs.get(job_id) else {
            return;
        };
        if let Some(placeholder) = self.entities.placeholder_mut(&placeholder_id(job_id)) {
            placeholder.sync_from(&tracked.record);
        }
    }

    pub(crate) fn push_feed(&mut self, entry: FeedEntry) {
        self.feed.push(entry);
        if self.feed.len() > FEED_LIMIT {
            let excess = self.feed.len() - FEED_LIMIT;
            self.feed.drain(..excess);
        }
    }

    pub(crate) fn in_flight_ids(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|tracked| !tracked.record.status.is_terminal())
            .map(|tracked| tracked.record.id.clone())
            .collect()
    }

    pub(crate) fn ids_with_resolution(&self, resolution: Resolution) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|tracked| tracked.resolution == resolution)
            .map(|tracked| tracked.record.id.clone())
            .collect()
    }
}
