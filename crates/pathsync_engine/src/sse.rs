//! Server-sent events transport for the push channel.
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

use crate::api::HttpApi;
use crate::connection::{MessageStream, Transport};
use crate::{FetchError, TransportError};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder, fed one line at a time.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub(crate) fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Dispatches a trailing event that was not followed by a blank line.
    pub(crate) fn finish(&mut self) -> Option<SseFrame> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Raw push message text for a frame.
///
/// Frames whose data already is a push message pass through. A named event
/// carrying a bare payload is wrapped as `{event, data}`.
pub(crate) fn frame_to_raw(frame: SseFrame) -> String {
    let Some(name) = frame.event.filter(|name| name != "message") else {
        return frame.data;
    };
    match serde_json::from_str::<Value>(&frame.data) {
        Ok(Value::Object(map)) if map.contains_key("event") => frame.data,
        Ok(payload) => json!({ "event": name, "data": payload }).to_string(),
        Err(_) => frame.data,
    }
}

/// Push transport over `GET {api}/events`.
#[derive(Clone)]
pub struct SseTransport {
    api: HttpApi,
}

impl SseTransport {
    pub fn new(api: HttpApi) -> Self {
        Self { api }
    }
}

struct ReadState<R> {
    lines: tokio::io::Lines<R>,
    decoder: SseDecoder,
    done: bool,
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn open(&self, token: &str) -> Result<MessageStream, TransportError> {
        let response = self.api.open_event_stream(token).await?;
        let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let lines = BufReader::new(StreamReader::new(body)).lines();
        let state = ReadState {
            lines,
            decoder: SseDecoder::default(),
            done: false,
        };

        let frames = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match state.lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(frame) = state.decoder.push_line(&line) {
                            return Some((Ok(frame_to_raw(frame)), state));
                        }
                    }
                    Ok(None) => {
                        state.done = true;
                        return state
                            .decoder
                            .finish()
                            .map(|frame| (Ok(frame_to_raw(frame)), state));
                    }
                    Err(err) => {
                        state.done = true;
                        return Some((Err(TransportError::Read(err.to_string())), state));
                    }
                }
            }
        });
        Ok(frames.boxed())
    }

    async fn subscribe(&self, token: &str, channel: &str) -> Result<(), FetchError> {
        self.api.subscribe_channel(token, channel).await
    }

    async fn unsubscribe(&self, token: &str, channel: &str) -> Result<(), FetchError> {
        self.api.unsubscribe_channel(token, channel).await
    }
}
