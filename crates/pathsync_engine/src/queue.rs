use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use sync_logging::{sync_debug, sync_error, sync_info, sync_trace, sync_warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::api::TelemetrySink;
use crate::persist::PersistError;
use crate::settings::TelemetrySettings;
use crate::store::TelemetryStore;
use crate::telemetry::{logical_id, TelemetryEvent};
use crate::TelemetryError;

/// Host lifecycle moments that warrant getting buffered events out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    VisibilityHidden,
    Teardown,
    ConnectivityRestored,
}

struct QueueState {
    /// Oldest first. The first `in_flight` entries are the batch being delivered.
    buffer: Vec<TelemetryEvent>,
    in_flight: usize,
    flushing: bool,
    /// Logical id -> last time it was queued or delivered.
    seen: HashMap<String, Instant>,
    timer: Option<JoinHandle<()>>,
    timer_seq: u64,
}

struct Shared {
    settings: TelemetrySettings,
    sink: Arc<dyn TelemetrySink>,
    store: Arc<dyn TelemetryStore>,
    state: Mutex<QueueState>,
}

/// Durable, deduplicating, batching buffer for analytics events.
///
/// Delivery is best effort: events survive failed flushes and restarts, but
/// nothing is retried beyond the next scheduled or manual flush.
#[derive(Clone)]
pub struct TelemetryQueue {
    inner: Arc<Shared>,
}

impl TelemetryQueue {
    pub fn new(
        settings: TelemetrySettings,
        sink: Arc<dyn TelemetrySink>,
        store: Arc<dyn TelemetryStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                settings,
                sink,
                store,
                state: Mutex::new(QueueState {
                    buffer: Vec::new(),
                    in_flight: 0,
                    flushing: false,
                    seen: HashMap::new(),
                    timer: None,
                    timer_seq: 0,
                }),
            }),
        }
    }

    /// Loads the persisted buffer ahead of anything queued since start.
    ///
    /// Entries older than the max age are dropped. Returns how many were kept.
    pub fn restore(&self) -> Result<usize, PersistError> {
        let stored = self.inner.store.load()?;
        let cutoff = chrono::Duration::from_std(self.inner.settings.max_age)
            .ok()
            .and_then(|max_age| Utc::now().checked_sub_signed(max_age));

        let mut state = self.lock();
        let loaded = stored.len();
        let mut restored: Vec<TelemetryEvent> = stored
            .into_iter()
            .filter(|event| cutoff.map_or(true, |cutoff| event.occurred_at >= cutoff))
            .filter(|event| {
                !state
                    .buffer
                    .iter()
                    .any(|queued| queued.client_event_id == event.client_event_id)
            })
            .collect();
        let kept = restored.len();
        if kept < loaded {
            sync_info!("Dropped {} stale or duplicate telemetry events", loaded - kept);
        }
        seed_seen(&mut state.seen, &restored, self.inner.settings.dedupe_ttl);

        // The batch in flight keeps its place at the front.
        let in_flight = state.in_flight;
        let tail = state.buffer.split_off(in_flight);
        state.buffer.append(&mut restored);
        state.buffer.extend(tail);
        self.enforce_cap(&mut state);
        self.persist(&state);
        Ok(kept)
    }

    /// Buffers an event. Returns `false` when it was collapsed into an
    /// equivalent event seen within the dedupe window.
    pub fn queue(&self, mut event: TelemetryEvent) -> bool {
        let now = Instant::now();
        let ttl = self.inner.settings.dedupe_ttl;
        let mut state = self.lock();
        state
            .seen
            .retain(|_, at| now.saturating_duration_since(*at) < ttl);

        let logical = logical_id(&event);
        if let Some(logical) = &logical {
            if state.seen.contains_key(logical) {
                sync_trace!("Collapsed duplicate {} event", event.event_type);
                return false;
            }
            state.seen.insert(logical.clone(), now);
        }
        event.client_event_id = match &logical {
            Some(logical) => format!("lg_{logical}"),
            None => Uuid::new_v4().to_string(),
        };
        event.logical_id = logical;
        state.buffer.push(event);
        self.enforce_cap(&mut state);
        self.persist(&state);

        let delay = if state.buffer.len() >= self.inner.settings.flush_threshold {
            Duration::ZERO
        } else {
            self.inner.settings.debounce
        };
        self.schedule_flush(&mut state, delay);
        true
    }

    /// Delivers the whole buffer in batches of at most `batch_size`.
    ///
    /// On the first failed batch the batch stays at the front of the buffer
    /// and the error is returned. Returns the number of events delivered.
    pub async fn flush(&self) -> Result<usize, TelemetryError> {
        let _flushing = {
            let mut state = self.lock();
            cancel_timer(&mut state);
            if state.flushing {
                return Err(TelemetryError::FlushInProgress);
            }
            state.flushing = true;
            FlushGuard { queue: self }
        };

        let mut delivered = 0;
        loop {
            let batch = {
                let mut state = self.lock();
                let size = state.buffer.len().min(self.inner.settings.batch_size);
                state.in_flight = size;
                state.buffer[..size].to_vec()
            };
            if batch.is_empty() {
                break;
            }

            let outcome = self.inner.sink.deliver(&batch).await;

            let mut guard = self.lock();
            let state = &mut *guard;
            let sent = state.in_flight;
            state.in_flight = 0;
            if let Err(err) = outcome {
                sync_warn!("Telemetry delivery of {} events failed: {}", sent, err);
                return Err(TelemetryError::Delivery(err));
            }
            let now = Instant::now();
            for event in state.buffer.drain(..sent) {
                if let Some(logical) = event.logical_id {
                    state.seen.insert(logical, now);
                }
            }
            self.persist(state);
            delivered += sent;
        }
        if delivered > 0 {
            sync_debug!("Delivered {} telemetry events", delivered);
        }
        Ok(delivered)
    }

    /// Starts a background flush for a host lifecycle moment.
    pub fn notify(&self, hook: LifecycleHook) {
        sync_debug!("Telemetry lifecycle hook {:?}", hook);
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let queue = self.clone();
        handle.spawn(async move {
            if let Err(err) = queue.flush().await {
                sync_debug!("Flush on {:?} did not complete: {}", hook, err);
            }
        });
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    pub fn pending(&self) -> Vec<TelemetryEvent> {
        self.lock().buffer.clone()
    }

    /// Drops the oldest events that are not part of the batch in flight.
    fn enforce_cap(&self, state: &mut QueueState) {
        let cap = self.inner.settings.max_entries;
        let excess = state.buffer.len().saturating_sub(cap);
        let removable = state.buffer.len() - state.in_flight;
        let drop = excess.min(removable);
        if drop > 0 {
            let start = state.in_flight;
            state.buffer.drain(start..start + drop);
            sync_warn!("Telemetry buffer full; dropped {} oldest events", drop);
        }
    }

    fn persist(&self, state: &QueueState) {
        if let Err(err) = self.inner.store.save(&state.buffer) {
            sync_error!("Persisting telemetry buffer failed: {}", err);
        }
    }

    /// Replaces any pending flush timer. Without a runtime, flushing is manual.
    fn schedule_flush(&self, state: &mut QueueState, delay: Duration) {
        cancel_timer(state);
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        state.timer_seq += 1;
        let seq = state.timer_seq;
        let queue = self.clone();
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            queue.fire_timer(seq).await;
        }));
    }

    async fn fire_timer(&self, seq: u64) {
        {
            let mut state = self.lock();
            if state.timer_seq != seq {
                return;
            }
            // Our own handle; dropping it keeps `flush` from aborting this task.
            state.timer = None;
        }
        match self.flush().await {
            Ok(_) | Err(TelemetryError::FlushInProgress) => {}
            Err(err) => sync_debug!("Scheduled telemetry flush failed: {}", err),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restored events still inside the dedupe window keep suppressing
/// equivalents for the rest of it.
fn seed_seen(seen: &mut HashMap<String, Instant>, events: &[TelemetryEvent], ttl: Duration) {
    let now = Instant::now();
    let wall_now = Utc::now();
    for event in events {
        let Some(logical) = &event.logical_id else {
            continue;
        };
        // Events stamped in the future count as just seen.
        let age = (wall_now - event.occurred_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age >= ttl {
            continue;
        }
        let at = now.checked_sub(age).unwrap_or(now);
        let entry = seen.entry(logical.clone()).or_insert(at);
        if *entry < at {
            *entry = at;
        }
    }
}

fn cancel_timer(state: &mut QueueState) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
}

/// Clears the flushing flag even if the flush future is dropped mid-delivery;
/// the undelivered batch is then still at the front of the buffer.
struct FlushGuard<'a> {
    queue: &'a TelemetryQueue,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.flushing = false;
        state.in_flight = 0;
    }
}
