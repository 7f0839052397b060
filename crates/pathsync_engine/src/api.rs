use std::sync::Arc;

use pathsync_core::{JobSnapshot, PathEntity};
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::CredentialProvider;
use crate::settings::FetchSettings;
use crate::telemetry::TelemetryEvent;
use crate::{FailureKind, FetchError};

/// Pull source for job snapshots.
#[async_trait::async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, FetchError>;
}

/// Pull source for canonical entities.
#[async_trait::async_trait]
pub trait EntitySource: Send + Sync {
    async fn fetch_entity(&self, entity_id: &str) -> Result<PathEntity, FetchError>;
    async fn list_entities(&self) -> Result<Vec<PathEntity>, FetchError>;
}

/// Delivery endpoint for telemetry batches. A batch either fully succeeds or fails.
#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn deliver(&self, batch: &[TelemetryEvent]) -> Result<(), FetchError>;
}

#[derive(Serialize)]
struct TelemetryBatch<'a> {
    events: &'a [TelemetryEvent],
}

#[derive(Serialize)]
struct ChannelRequest<'a> {
    channel: &'a str,
}

/// REST client for the platform API.
#[derive(Clone)]
pub struct HttpApi {
    base: Url,
    client: reqwest::Client,
    stream_client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpApi {
    pub fn new(
        base_url: &str,
        settings: &FetchSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, FetchError> {
        let base = Url::parse(base_url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(FetchError::new(
                FailureKind::InvalidUrl,
                format!("{base_url} cannot be used as a base url"),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        // The push stream stays open indefinitely, so it gets no overall timeout.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            base,
            client,
            stream_client,
            credentials,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::new(FailureKind::InvalidUrl, "base url cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token.map(ToOwned::to_owned).or_else(|| self.credentials.token()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, FetchError> {
        let url = self.endpoint(segments)?;
        let response = self
            .authorized(self.client.get(url), None)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;
        response
            .json::<T>()
            .await
            .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
        token: Option<&str>,
    ) -> Result<(), FetchError> {
        let url = self.endpoint(segments)?;
        let response = self
            .authorized(self.client.post(url), token)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response).map(|_| ())
    }

    /// Opens the server-sent event stream.
    pub async fn open_event_stream(&self, token: &str) -> Result<reqwest::Response, FetchError> {
        let url = self.endpoint(&["events"])?;
        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response)
    }

    pub async fn subscribe_channel(&self, token: &str, channel: &str) -> Result<(), FetchError> {
        self.post_json(&["events", "subscribe"], &ChannelRequest { channel }, Some(token))
            .await
    }

    pub async fn unsubscribe_channel(&self, token: &str, channel: &str) -> Result<(), FetchError> {
        self.post_json(&["events", "unsubscribe"], &ChannelRequest { channel }, Some(token))
            .await
    }
}

#[async_trait::async_trait]
impl JobSource for HttpApi {
    async fn fetch_snapshot(&self, job_id: &str) -> Result<JobSnapshot, FetchError> {
        self.get_json(&["jobs", job_id]).await
    }
}

#[async_trait::async_trait]
impl EntitySource for HttpApi {
    async fn fetch_entity(&self, entity_id: &str) -> Result<PathEntity, FetchError> {
        self.get_json(&["paths", entity_id]).await
    }

    async fn list_entities(&self) -> Result<Vec<PathEntity>, FetchError> {
        self.get_json(&["paths"]).await
    }
}

#[async_trait::async_trait]
impl TelemetrySink for HttpApi {
    async fn deliver(&self, batch: &[TelemetryEvent]) -> Result<(), FetchError> {
        self.post_json(&["telemetry", "events"], &TelemetryBatch { events: batch }, None)
            .await
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::Unauthorized,
        other => FailureKind::HttpStatus(other.as_u16()),
    };
    Err(FetchError::new(kind, status.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
