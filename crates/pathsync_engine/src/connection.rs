use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use pathsync_core::{ConnectionStatus, PushMessage};
use sync_logging::{sync_debug, sync_info, sync_warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::CredentialProvider;
use crate::backoff::Backoff;
use crate::settings::BackoffSettings;
use crate::{ConnectionError, FetchError, TransportError};

const EVENT_CAPACITY: usize = 256;

/// Raw message texts from an open push stream, in arrival order.
pub type MessageStream = BoxStream<'static, Result<String, TransportError>>;

/// The wire side of the push channel.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, token: &str) -> Result<MessageStream, TransportError>;
    async fn subscribe(&self, token: &str, channel: &str) -> Result<(), FetchError>;
    async fn unsubscribe(&self, token: &str, channel: &str) -> Result<(), FetchError>;
}

/// Notifications fanned out to every subscriber of the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status(ConnectionStatus),
    Error(String),
    Message(PushMessage),
}

struct ConnState {
    status: ConnectionStatus,
    /// Bumped on every connect; callbacks from older transports are ignored.
    generation: u64,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    retry_seq: u64,
    backoff: Backoff,
    channels: BTreeSet<String>,
    last_message: Option<PushMessage>,
    closed: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    events: broadcast::Sender<ConnectionEvent>,
    state: Mutex<ConnState>,
}

/// Owns the single push connection: auth-gated connect, reconnect with
/// backoff, and channel membership.
///
/// Cloning yields another handle to the same connection. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        backoff: BackoffSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Shared {
                transport,
                credentials,
                events,
                state: Mutex::new(ConnState {
                    status: ConnectionStatus::Disconnected,
                    generation: 0,
                    reader: None,
                    retry: None,
                    retry_seq: 0,
                    backoff: Backoff::new(backoff),
                    channels: BTreeSet::new(),
                    last_message: None,
                    closed: false,
                }),
            }),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub fn last_message(&self) -> Option<PushMessage> {
        self.lock().last_message.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().channels.iter().cloned().collect()
    }

    pub fn retry_pending(&self) -> bool {
        self.lock().retry.is_some()
    }

    pub fn has_transport(&self) -> bool {
        self.lock().reader.is_some()
    }

    /// Opens a fresh transport, replacing any previous one.
    ///
    /// Without a credential nothing is opened and a retry is scheduled instead.
    pub fn connect(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        let Some(token) = self.inner.credentials.token() else {
            sync_info!("No credential yet; deferring push connection");
            self.schedule_retry(&mut state);
            return;
        };

        cancel_retry(&mut state);
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        self.set_status(&mut state, ConnectionStatus::Connecting);

        let manager = self.clone();
        state.reader = Some(tokio::spawn(async move {
            manager.run_transport(generation, token).await;
        }));
    }

    /// Tears the connection down for good (logout).
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        cancel_retry(&mut state);
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        state.generation += 1;
        self.set_status(&mut state, ConnectionStatus::Disconnected);
    }

    pub async fn subscribe(&self, channel: &str) -> Result<(), ConnectionError> {
        let token = {
            let state = self.lock();
            if state.channels.contains(channel) {
                return Ok(());
            }
            self.ready_token(&state, channel)?
        };
        self.inner
            .transport
            .subscribe(&token, channel)
            .await
            .inspect_err(|err| sync_warn!("Subscribe to {} failed: {}", channel, err))?;
        self.lock().channels.insert(channel.to_string());
        sync_debug!("Subscribed to {}", channel);
        Ok(())
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), ConnectionError> {
        let token = {
            let state = self.lock();
            if !state.channels.contains(channel) {
                return Ok(());
            }
            self.ready_token(&state, channel)?
        };
        self.inner
            .transport
            .unsubscribe(&token, channel)
            .await
            .inspect_err(|err| sync_warn!("Unsubscribe from {} failed: {}", channel, err))?;
        self.lock().channels.remove(channel);
        sync_debug!("Unsubscribed from {}", channel);
        Ok(())
    }

    /// Re-issues the remote subscribe call for every channel in the membership
    /// set. Returns the last failure, if any; membership is kept either way.
    pub async fn resubscribe_all(&self) -> Result<(), ConnectionError> {
        let (token, channels) = {
            let state = self.lock();
            if state.channels.is_empty() {
                return Ok(());
            }
            let token = self.ready_token(&state, "all channels")?;
            (token, state.channels.iter().cloned().collect::<Vec<_>>())
        };
        let mut outcome = Ok(());
        for channel in channels {
            if let Err(err) = self.inner.transport.subscribe(&token, &channel).await {
                sync_warn!("Resubscribe to {} failed: {}", channel, err);
                outcome = Err(ConnectionError::Remote(err));
            }
        }
        outcome
    }

    fn ready_token(&self, state: &ConnState, channel: &str) -> Result<String, ConnectionError> {
        if !state.status.is_connected() {
            sync_warn!("Channel request for {} while not connected", channel);
            return Err(ConnectionError::NotConnected);
        }
        self.inner
            .credentials
            .token()
            .ok_or(ConnectionError::NoCredential)
    }

    async fn run_transport(&self, generation: u64, token: String) {
        let mut stream = match self.inner.transport.open(&token).await {
            Ok(stream) => stream,
            Err(err) => {
                self.handle_error(generation, err);
                return;
            }
        };
        self.handle_open(generation);
        while let Some(item) = stream.next().await {
            match item {
                Ok(raw) => self.handle_message(generation, &raw),
                Err(err) => {
                    self.handle_error(generation, err);
                    return;
                }
            }
        }
        self.handle_error(generation, TransportError::Closed);
    }

    fn handle_open(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        cancel_retry(&mut state);
        state.backoff.reset();
        sync_info!("Push connection open");
        self.set_status(&mut state, ConnectionStatus::Open);
    }

    fn handle_message(&self, generation: u64, raw: &str) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        match PushMessage::parse(raw) {
            Ok(message) => {
                state.last_message = Some(message.clone());
                let _ = self.inner.events.send(ConnectionEvent::Message(message));
            }
            Err(err) => sync_warn!("Dropping malformed push message: {}", err),
        }
    }

    fn handle_error(&self, generation: u64, err: TransportError) {
        let mut state = self.lock();
        if state.generation != generation || state.closed {
            return;
        }
        sync_warn!("Push connection lost: {}", err);
        // This runs on the reader task itself; dropping the handle detaches it.
        state.reader = None;
        self.set_status(&mut state, ConnectionStatus::Disconnected);
        let _ = self.inner.events.send(ConnectionEvent::Error(err.to_string()));
        self.schedule_retry(&mut state);
    }

    /// Replaces any pending retry with a new one.
    fn schedule_retry(&self, state: &mut ConnState) {
        cancel_retry(state);
        let delay = state.backoff.next_delay();
        state.retry_seq += 1;
        let seq = state.retry_seq;
        if state.reader.is_none() {
            self.set_status(state, ConnectionStatus::Retrying);
        }
        sync_info!("Push connection retry in {:?}", delay);

        let manager = self.clone();
        state.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.fire_retry(seq);
        }));
    }

    fn fire_retry(&self, seq: u64) {
        {
            let mut state = self.lock();
            if state.retry_seq != seq || state.closed {
                return;
            }
            // Our own handle; drop it so `connect` does not abort this task.
            state.retry = None;
        }
        self.connect();
    }

    fn set_status(&self, state: &mut ConnState, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        state.status = status;
        let _ = self.inner.events.send(ConnectionEvent::Status(status));
    }

    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn cancel_retry(state: &mut ConnState) {
    if let Some(retry) = state.retry.take() {
        retry.abort();
    }
}
