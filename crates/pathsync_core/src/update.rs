use std::collections::BTreeSet;

use sync_logging::{sync_debug, sync_warn};

use crate::{
    parse_job_event, placeholder_id, Effect, EntityRow, FeedEntry, JobEventKind, JobStatus,
    JobUpdate, Msg, PathEntity, PushMessage, Resolution, SyncState,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: SyncState, msg: Msg) -> (SyncState, Vec<Effect>) {
    let effects = match msg {
        Msg::JobStarted { job_id, title } => {
            if state.is_active(&job_id) {
                Vec::new()
            } else {
                state.activate(&job_id, title);
                activation_effects(&job_id)
            }
        }
        Msg::TrackJob { job_id } => match state.job(&job_id) {
            Some(record) if record.status.is_terminal() => Vec::new(),
            Some(_) => vec![Effect::FetchSnapshot { job_id }],
            None => {
                state.activate(&job_id, None);
                activation_effects(&job_id)
            }
        },
        Msg::DismissJob { job_id } => {
            dismiss(&mut state, &job_id);
            Vec::new()
        }
        Msg::PushReceived(message) => on_push(&mut state, &message),
        Msg::SnapshotLoaded(snapshot) => {
            if state.is_active(&snapshot.id) {
                merge(&mut state, &snapshot.id, &snapshot.to_update())
            } else {
                sync_debug!("Ignoring snapshot for inactive job {}", snapshot.id);
                Vec::new()
            }
        }
        Msg::SnapshotFailed { job_id, error } => {
            sync_warn!("Snapshot for job {} failed: {}", job_id, error);
            Vec::new()
        }
        Msg::EntityLoaded { job_id, entity } => {
            on_entity_loaded(&mut state, &job_id, entity);
            Vec::new()
        }
        Msg::EntityLoadFailed { job_id, error } => on_entity_failed(&mut state, &job_id, &error),
        Msg::CollectionLoaded(entities) => {
            on_collection_loaded(&mut state, entities);
            Vec::new()
        }
        Msg::CollectionLoadFailed { error } => {
            sync_warn!("Collection reload failed: {}", error);
            Vec::new()
        }
        Msg::ConnectionChanged(status) => {
            if !state.set_connection(status) || !status.is_connected() {
                Vec::new()
            } else {
                let mut effects = Vec::new();
                if state.note_opened() {
                    // Messages sent while we were away are gone; converge from snapshots.
                    effects.extend(refetch_in_flight(&state));
                }
                effects.push(Effect::Resubscribe);
                effects
            }
        }
        Msg::PushGap => refetch_in_flight(&state),
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn refetch_in_flight(state: &SyncState) -> Vec<Effect> {
    state
        .in_flight_ids()
        .into_iter()
        .map(|job_id| Effect::FetchSnapshot { job_id })
        .collect()
}

fn activation_effects(job_id: &str) -> Vec<Effect> {
    vec![
        Effect::FetchSnapshot {
            job_id: job_id.to_string(),
        },
        Effect::StartPolling {
            job_id: job_id.to_string(),
        },
    ]
}

fn on_push(state: &mut SyncState, message: &PushMessage) -> Vec<Effect> {
    if let Some(identity) = state.identity() {
        if !message.channel.is_empty() && message.channel != identity {
            sync_debug!("Ignoring message on unrelated channel {}", message.channel);
            return Vec::new();
        }
    }
    let Some(event) = parse_job_event(message) else {
        return Vec::new();
    };
    if let Some(job_type) = &event.job_type {
        if job_type != state.job_type() {
            sync_debug!("Ignoring {} for job type {}", message.event, job_type);
            return Vec::new();
        }
    }

    let mut effects = Vec::new();
    if !state.is_active(&event.job_id) {
        if event.kind != JobEventKind::Created {
            sync_debug!("Ignoring {} for inactive job {}", message.event, event.job_id);
            return effects;
        }
        let title = message
            .data
            .as_ref()
            .and_then(|data| data.pointer("/job/title").or_else(|| data.get("title")))
            .and_then(|title| title.as_str())
            .map(ToOwned::to_owned);
        state.activate(&event.job_id, title);
        effects.extend(activation_effects(&event.job_id));
    }
    effects.extend(merge(state, &event.job_id, &event.update));
    effects
}

/// The single merge path for push events and snapshots.
fn merge(state: &mut SyncState, job_id: &str, update: &JobUpdate) -> Vec<Effect> {
    let Some(tracked) = state.tracked_mut(job_id) else {
        return Vec::new();
    };
    let applied = tracked.record.apply(update);
    if !applied.changed {
        return Vec::new();
    }

    let record = &tracked.record;
    let mut feed_entry = None;
    if !record.status.is_terminal() {
        if let Some(stage) = &record.stage {
            let key = (stage.clone(), record.progress_bucket());
            if tracked.last_feed_key.as_ref() != Some(&key) {
                feed_entry = Some(FeedEntry {
                    job_id: job_id.to_string(),
                    stage: key.0.clone(),
                    progress: key.1,
                    message: record.message.clone(),
                });
                tracked.last_feed_key = Some(key);
            }
        }
    }

    let mut effects = Vec::new();
    if applied.became_terminal {
        effects.push(Effect::StopPolling {
            job_id: job_id.to_string(),
        });
        if tracked.record.status == JobStatus::Succeeded {
            match tracked.record.result_entity_id() {
                Some(entity_id) => {
                    tracked.resolution = Resolution::AwaitingEntity;
                    effects.push(Effect::FetchEntity {
                        job_id: job_id.to_string(),
                        entity_id,
                    });
                }
                None => {
                    tracked.resolution = Resolution::AwaitingReload;
                    effects.push(Effect::ReloadCollection);
                }
            }
        } else {
            tracked.resolution = Resolution::Settled;
        }
    }

    state.sync_placeholder(job_id);
    if let Some(entry) = feed_entry {
        state.push_feed(entry);
    }
    state.mark_dirty();
    effects
}

fn on_entity_loaded(state: &mut SyncState, job_id: &str, entity: PathEntity) {
    let awaiting = state
        .tracked(job_id)
        .is_some_and(|tracked| tracked.resolution == Resolution::AwaitingEntity);
    if !awaiting {
        sync_debug!("Ignoring entity {} for unresolved job {}", entity.id, job_id);
        return;
    }
    state
        .entities_mut()
        .replace(&placeholder_id(job_id), EntityRow::Canonical(entity));
    state.discard(job_id);
}

fn on_entity_failed(state: &mut SyncState, job_id: &str, error: &str) -> Vec<Effect> {
    let awaiting = state
        .tracked(job_id)
        .is_some_and(|tracked| tracked.resolution == Resolution::AwaitingEntity);
    if !awaiting {
        return Vec::new();
    }
    sync_warn!(
        "Entity fetch for job {} failed ({}); reloading collection",
        job_id,
        error
    );
    state.entities_mut().remove(&placeholder_id(job_id));
    state.discard(job_id);
    vec![Effect::ReloadCollection]
}

fn on_collection_loaded(state: &mut SyncState, entities: Vec<PathEntity>) {
    for job_id in state.ids_with_resolution(Resolution::AwaitingReload) {
        state.discard(&job_id);
    }
    let active: BTreeSet<String> = state
        .entities()
        .rows()
        .iter()
        .filter_map(|row| match row {
            EntityRow::Placeholder(p) if state.is_active(&p.job_id) => Some(p.job_id.clone()),
            _ => None,
        })
        .collect();
    state
        .entities_mut()
        .replace_canonical(entities, |p| active.contains(&p.job_id));
    state.mark_dirty();
}

fn dismiss(state: &mut SyncState, job_id: &str) {
    let settled = state
        .tracked(job_id)
        .is_some_and(|tracked| tracked.resolution == Resolution::Settled);
    if settled {
        state.entities_mut().remove(&placeholder_id(job_id));
        state.discard(job_id);
    }
}
