//! Pathsync core: pure job reconciliation state machine and view-model helpers.
mod effect;
mod entity;
mod job;
mod msg;
mod state;
mod update;
mod view_model;
mod wire;

pub use effect::Effect;
pub use entity::{placeholder_id, EntityCollection, EntityRow, PathEntity, Placeholder};
pub use job::{
    clamp_progress, progress_bucket, stage_label, Applied, JobId, JobRecord, JobStatus, JobUpdate,
    LEARNING_BUILD,
};
pub use msg::Msg;
pub use state::{ConnectionStatus, FeedEntry, Resolution, SyncState, TrackedJob, FEED_LIMIT};
pub use update::update;
pub use view_model::{JobRowView, SyncViewModel};
pub use wire::{parse_job_event, JobEvent, JobEventKind, JobSnapshot, PushMessage};
