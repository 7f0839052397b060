use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pathsync_core::{JobSnapshot, Msg};
use sync_logging::sync_debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::JobSource;
use crate::{FetchError, JobId};

/// Fallback pull loops, at most one per job.
pub(crate) struct PollRegistry {
    interval: Duration,
    source: Arc<dyn JobSource>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    loops: HashMap<JobId, CancellationToken>,
}

impl PollRegistry {
    pub(crate) fn new(
        interval: Duration,
        source: Arc<dyn JobSource>,
        msg_tx: mpsc::UnboundedSender<Msg>,
    ) -> Self {
        Self {
            interval,
            source,
            msg_tx,
            loops: HashMap::new(),
        }
    }

    pub(crate) fn start(&mut self, job_id: &str) {
        if self.is_polling(job_id) {
            return;
        }
        let token = CancellationToken::new();
        self.loops.insert(job_id.to_string(), token.clone());
        sync_debug!("Polling job {} every {:?}", job_id, self.interval);
        tokio::spawn(poll_loop(
            job_id.to_string(),
            self.interval,
            self.source.clone(),
            self.msg_tx.clone(),
            token,
        ));
    }

    pub(crate) fn stop(&mut self, job_id: &str) {
        if let Some(token) = self.loops.remove(job_id) {
            token.cancel();
            sync_debug!("Stopped polling job {}", job_id);
        }
    }

    pub(crate) fn stop_all(&mut self) {
        for (_, token) in self.loops.drain() {
            token.cancel();
        }
    }

    pub(crate) fn is_polling(&self, job_id: &str) -> bool {
        self.loops.contains_key(job_id)
    }
}

async fn poll_loop(
    job_id: JobId,
    interval: Duration,
    source: Arc<dyn JobSource>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let outcome = source.fetch_snapshot(&job_id).await;
        // Stopped while the request was in flight.
        if token.is_cancelled() {
            return;
        }
        if msg_tx.send(snapshot_msg(&job_id, outcome)).is_err() {
            return;
        }
    }
}

/// Folds a snapshot pull into the message the reducer expects.
pub(crate) fn snapshot_msg(job_id: &str, outcome: Result<JobSnapshot, FetchError>) -> Msg {
    match outcome {
        Ok(mut snapshot) => {
            if snapshot.id.is_empty() {
                snapshot.id = job_id.to_string();
            }
            Msg::SnapshotLoaded(snapshot)
        }
        Err(err) => Msg::SnapshotFailed {
            job_id: job_id.to_string(),
            error: err.to_string(),
        },
    }
}
