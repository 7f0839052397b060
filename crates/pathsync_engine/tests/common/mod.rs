#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use pathsync_core::{ConnectionStatus, JobSnapshot, PathEntity};
use pathsync_engine::{
    ConnectionEvent, EntitySource, FailureKind, FetchError, JobSource, MessageStream,
    TelemetryEvent, TelemetrySink, Transport, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

pub fn init_logging() {
    sync_logging::initialize_for_tests();
}

type Feed = mpsc::UnboundedSender<Result<String, TransportError>>;

#[derive(Default)]
struct TransportLog {
    opens: usize,
    fail_open: bool,
    fail_subscribe: bool,
    feed: Option<Feed>,
    subscribes: Vec<String>,
    unsubscribes: Vec<String>,
}

/// In-memory push transport driven from the test.
#[derive(Default)]
pub struct FakeTransport {
    log: Mutex<TransportLog>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.log.lock().unwrap().fail_open = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.log.lock().unwrap().fail_subscribe = fail;
    }

    /// Delivers a raw message on the most recently opened stream.
    pub fn push(&self, raw: impl Into<String>) {
        let log = self.log.lock().unwrap();
        let feed = log.feed.as_ref().expect("no open stream");
        feed.send(Ok(raw.into())).expect("stream dropped");
    }

    pub fn push_json(&self, value: Value) {
        self.push(value.to_string());
    }

    /// Breaks the current stream with a read error.
    pub fn fail_stream(&self) {
        let mut log = self.log.lock().unwrap();
        if let Some(feed) = log.feed.take() {
            let _ = feed.send(Err(TransportError::Read("connection reset".into())));
        }
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.log.lock().unwrap().subscribes.clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.log.lock().unwrap().unsubscribes.clone()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _token: &str) -> Result<MessageStream, TransportError> {
        let mut log = self.log.lock().unwrap();
        log.opens += 1;
        if log.fail_open {
            return Err(TransportError::Request(FetchError::new(
                FailureKind::Network,
                "connection refused",
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        log.feed = Some(tx);
        let messages = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(messages.boxed())
    }

    async fn subscribe(&self, _token: &str, channel: &str) -> Result<(), FetchError> {
        let mut log = self.log.lock().unwrap();
        log.subscribes.push(channel.to_string());
        if log.fail_subscribe {
            return Err(FetchError::new(FailureKind::HttpStatus(500), "boom"));
        }
        Ok(())
    }

    async fn unsubscribe(&self, _token: &str, channel: &str) -> Result<(), FetchError> {
        self.log.lock().unwrap().unsubscribes.push(channel.to_string());
        Ok(())
    }
}

/// Snapshot source answering from a table; unknown ids are 404s.
#[derive(Default)]
pub struct FakeJobs {
    snapshots: Mutex<HashMap<String, Value>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, job_id: &str, snapshot: Value) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(job_id.to_string(), snapshot);
    }

    pub fn calls(&self, job_id: &str) -> usize {
        self.calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl JobSource for FakeJobs {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;
        let snapshot = self.snapshots.lock().unwrap().get(job_id).cloned();
        match snapshot {
            Some(value) => Ok(serde_json::from_value(value).unwrap()),
            None => Err(FetchError::new(FailureKind::HttpStatus(404), "not found")),
        }
    }
}

#[derive(Default)]
pub struct FakeEntities {
    entities: Mutex<Vec<PathEntity>>,
    fail_fetch: AtomicBool,
    lists: Mutex<usize>,
}

impl FakeEntities {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, id: &str, title: &str) {
        self.entities.lock().unwrap().push(PathEntity::new(id, title));
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn lists(&self) -> usize {
        *self.lists.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl EntitySource for FakeEntities {
    async fn fetch_entity(&self, entity_id: &str) -> Result<PathEntity, FetchError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FetchError::new(FailureKind::Timeout, "slow backend"));
        }
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|entity| entity.id == entity_id)
            .cloned()
            .ok_or_else(|| FetchError::new(FailureKind::HttpStatus(404), "not found"))
    }

    async fn list_entities(&self) -> Result<Vec<PathEntity>, FetchError> {
        *self.lists.lock().unwrap() += 1;
        Ok(self.entities.lock().unwrap().clone())
    }
}

/// Records delivered batches; can be told to fail or to stall.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<TelemetryEvent>>>,
    fail: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.lock().unwrap() = stall;
    }

    pub fn batches(&self) -> Vec<Vec<TelemetryEvent>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl TelemetrySink for RecordingSink {
    async fn deliver(&self, batch: &[TelemetryEvent]) -> Result<(), FetchError> {
        let stall = *self.stall.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::new(FailureKind::HttpStatus(503), "unavailable"));
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

pub fn job_event(event: &str, channel: &str, job: Value) -> Value {
    json!({
        "event": event,
        "channel": channel,
        "data": { "job": job },
    })
}

/// Waits (in virtual time when paused) until the manager reports `target`.
pub async fn wait_for_status(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    target: ConnectionStatus,
) {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Status(status)) if status == target => return,
                Ok(_) => continue,
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    })
    .await
    .expect("status never reached");
}

/// Polls `check` until it holds, letting spawned tasks run in between.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
