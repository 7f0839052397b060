use std::sync::Arc;

use pathsync_core::{update, ConnectionStatus, Effect, JobId, Msg, SyncState, SyncViewModel};
use sync_logging::{sync_debug, sync_info, sync_warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{EntitySource, HttpApi, JobSource, TelemetrySink};
use crate::auth::CredentialProvider;
use crate::connection::{ConnectionEvent, ConnectionManager, Transport};
use crate::poll::{snapshot_msg, PollRegistry};
use crate::queue::{LifecycleHook, TelemetryQueue};
use crate::settings::SessionSettings;
use crate::sse::SseTransport;
use crate::store::{FileTelemetryStore, MemoryTelemetryStore, TelemetryStore};
use crate::FetchError;

/// Everything a session talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub jobs: Arc<dyn JobSource>,
    pub entities: Arc<dyn EntitySource>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub telemetry_sink: Arc<dyn TelemetrySink>,
    pub telemetry_store: Arc<dyn TelemetryStore>,
}

impl Collaborators {
    /// The production wiring: one HTTP client for pulls, delivery and the SSE stream.
    pub fn http(
        settings: &SessionSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, FetchError> {
        let api = HttpApi::new(&settings.api_base, &settings.fetch, credentials.clone())?;
        let telemetry_store: Arc<dyn TelemetryStore> = match &settings.telemetry_path {
            Some(path) => Arc::new(FileTelemetryStore::new(path.clone())),
            None => Arc::new(MemoryTelemetryStore::new()),
        };
        let transport = Arc::new(SseTransport::new(api.clone()));
        let api = Arc::new(api);
        Ok(Self {
            transport,
            jobs: api.clone(),
            entities: api.clone(),
            credentials,
            telemetry_sink: api,
            telemetry_store,
        })
    }
}

/// One signed-in sync context: push connection, job reconciliation and the
/// telemetry queue. Built on session start, torn down on logout.
pub struct SyncSession {
    msg_tx: mpsc::UnboundedSender<Msg>,
    view_rx: watch::Receiver<SyncViewModel>,
    connection: ConnectionManager,
    telemetry: TelemetryQueue,
    stop: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl SyncSession {
    /// Starts the driver task, loads the entity collection and connects.
    /// Must be called from within a tokio runtime.
    pub fn start(settings: SessionSettings, collaborators: Collaborators) -> Self {
        let connection = ConnectionManager::new(
            collaborators.transport.clone(),
            collaborators.credentials.clone(),
            settings.backoff.clone(),
        );
        let telemetry = TelemetryQueue::new(
            settings.telemetry.clone(),
            collaborators.telemetry_sink.clone(),
            collaborators.telemetry_store.clone(),
        );
        match telemetry.restore() {
            Ok(0) => {}
            Ok(restored) => sync_info!("Restored {} buffered telemetry events", restored),
            Err(err) => sync_warn!("Could not restore telemetry buffer: {}", err),
        }

        let state = SyncState::new(settings.job_type.clone(), settings.identity.clone());
        let (view_tx, view_rx) = watch::channel(state.view());
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let driver = Driver {
            state,
            channels: settings.channels.clone(),
            msg_tx: msg_tx.clone(),
            msg_rx,
            events: connection.events(),
            polls: PollRegistry::new(
                settings.poll_interval,
                collaborators.jobs.clone(),
                msg_tx.clone(),
            ),
            view_tx,
            connection: connection.clone(),
            telemetry: telemetry.clone(),
            jobs: collaborators.jobs,
            entities: collaborators.entities,
            stop: stop.clone(),
        };
        let driver = tokio::spawn(driver.run());
        connection.connect();

        Self {
            msg_tx,
            view_rx,
            connection,
            telemetry,
            stop,
            driver: Some(driver),
        }
    }

    /// A job-creating action was issued; show its placeholder right away.
    pub fn job_started(&self, job_id: impl Into<JobId>, title: Option<String>) {
        self.dispatch(Msg::JobStarted {
            job_id: job_id.into(),
            title,
        });
    }

    pub fn track_job(&self, job_id: impl Into<JobId>) {
        self.dispatch(Msg::TrackJob {
            job_id: job_id.into(),
        });
    }

    pub fn dismiss_job(&self, job_id: impl Into<JobId>) {
        self.dispatch(Msg::DismissJob {
            job_id: job_id.into(),
        });
    }

    pub fn dispatch(&self, msg: Msg) {
        if self.msg_tx.send(msg).is_err() {
            sync_debug!("Session driver gone; message dropped");
        }
    }

    /// Latest view model; receivers see every dirty update.
    pub fn view(&self) -> watch::Receiver<SyncViewModel> {
        self.view_rx.clone()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn telemetry(&self) -> &TelemetryQueue {
        &self.telemetry
    }

    /// Stops polling, closes the push connection and makes one last attempt
    /// to deliver buffered telemetry.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(err) = driver.await {
                sync_warn!("Session driver ended abnormally: {}", err);
            }
        }
        self.connection.shutdown();
        match self.telemetry.flush().await {
            Ok(sent) => sync_debug!("Final telemetry flush sent {} events", sent),
            Err(err) => sync_warn!("Final telemetry flush failed: {}", err),
        }
        sync_info!("Sync session closed");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop.cancel();
        self.connection.shutdown();
    }
}

/// Owns the reducer state; the only place it is mutated.
struct Driver {
    state: SyncState,
    channels: Vec<String>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    msg_rx: mpsc::UnboundedReceiver<Msg>,
    events: broadcast::Receiver<ConnectionEvent>,
    polls: PollRegistry,
    view_tx: watch::Sender<SyncViewModel>,
    connection: ConnectionManager,
    telemetry: TelemetryQueue,
    jobs: Arc<dyn JobSource>,
    entities: Arc<dyn EntitySource>,
    stop: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        self.execute(Effect::ReloadCollection);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                msg = self.msg_rx.recv() => match msg {
                    Some(msg) => self.dispatch(msg),
                    None => break,
                },
                event = self.events.recv() => match event {
                    Ok(event) => self.on_connection_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        sync_warn!("Session fell behind; {} push events lost", skipped);
                        self.dispatch(Msg::PushGap);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        self.polls.stop_all();
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Status(status) => {
                if status == ConnectionStatus::Open {
                    self.telemetry.notify(LifecycleHook::ConnectivityRestored);
                }
                self.dispatch(Msg::ConnectionChanged(status));
            }
            ConnectionEvent::Message(message) => self.dispatch(Msg::PushReceived(message)),
            ConnectionEvent::Error(error) => sync_debug!("Push connection error: {}", error),
        }
    }

    fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = update(state, msg);
        self.state = state;
        for effect in effects {
            self.execute(effect);
        }
        if self.state.consume_dirty() {
            self.view_tx.send_replace(self.state.view());
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartPolling { job_id } => self.polls.start(&job_id),
            Effect::StopPolling { job_id } => self.polls.stop(&job_id),
            Effect::FetchSnapshot { job_id } => {
                let jobs = self.jobs.clone();
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let outcome = jobs.fetch_snapshot(&job_id).await;
                    let _ = msg_tx.send(snapshot_msg(&job_id, outcome));
                });
            }
            Effect::FetchEntity { job_id, entity_id } => {
                let entities = self.entities.clone();
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let msg = match entities.fetch_entity(&entity_id).await {
                        Ok(entity) => Msg::EntityLoaded { job_id, entity },
                        Err(err) => Msg::EntityLoadFailed {
                            job_id,
                            error: err.to_string(),
                        },
                    };
                    let _ = msg_tx.send(msg);
                });
            }
            Effect::ReloadCollection => {
                let entities = self.entities.clone();
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let msg = match entities.list_entities().await {
                        Ok(list) => Msg::CollectionLoaded(list),
                        Err(err) => Msg::CollectionLoadFailed {
                            error: err.to_string(),
                        },
                    };
                    let _ = msg_tx.send(msg);
                });
            }
            Effect::Resubscribe => {
                let connection = self.connection.clone();
                let channels = self.channels.clone();
                tokio::spawn(async move {
                    if let Err(err) = connection.resubscribe_all().await {
                        sync_warn!("Resubscribe after open failed: {}", err);
                    }
                    let joined = connection.subscriptions();
                    for channel in channels.iter().filter(|channel| !joined.contains(*channel)) {
                        if let Err(err) = connection.subscribe(channel).await {
                            sync_warn!("Subscribe to {} failed: {}", channel, err);
                        }
                    }
                });
            }
        }
    }
}
