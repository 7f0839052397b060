use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const SCHEMA_VERSION: u16 = 1;

/// Event types emitted often with little new information; these are
/// collapsed by logical id inside the dedupe window.
pub const DEDUPED_TYPES: &[&str] = &["scroll_sample", "scroll_depth", "block_read", "block_view"];

/// Scroll positions are compared in steps of this many percent.
const SCROLL_STEP: u64 = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Idempotency key the server uses to drop replays.
    #[serde(default)]
    pub client_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
    #[serde(default = "default_version")]
    pub schema_version: u16,
    #[serde(default = "default_version")]
    pub event_version: u16,
}

fn default_version() -> u16 {
    1
}

impl TelemetryEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            path_id: None,
            node_id: None,
            activity_id: None,
            data: Value::Object(Map::new()),
            client_event_id: String::new(),
            logical_id: None,
            schema_version: SCHEMA_VERSION,
            event_version: 1,
        }
    }

    pub fn with_path(mut self, path_id: impl Into<String>) -> Self {
        self.path_id = Some(path_id.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Stable hash of the fields that make two events equivalent, for the
/// deduplicated event types. Other types get `None`.
pub fn logical_id(event: &TelemetryEvent) -> Option<String> {
    if !DEDUPED_TYPES.contains(&event.event_type.as_str()) {
        return None;
    }

    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    };
    feed(&event.event_type);
    feed(event.path_id.as_deref().unwrap_or(""));
    feed(event.node_id.as_deref().unwrap_or(""));
    feed(event.activity_id.as_deref().unwrap_or(""));
    for part in significant_data(event) {
        feed(&part);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    Some(hex)
}

fn significant_data(event: &TelemetryEvent) -> Vec<String> {
    let data = &event.data;
    if event.event_type.starts_with("scroll") {
        let percent = data
            .get("percent")
            .or_else(|| data.get("depth"))
            .and_then(Value::as_f64)
            .map(|p| p.clamp(0.0, 100.0) as u64)
            .unwrap_or(0);
        vec![(percent / SCROLL_STEP * SCROLL_STEP).to_string()]
    } else {
        ["block_id", "section"]
            .iter()
            .map(|key| match data.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => String::new(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_high_frequency_types_get_logical_ids() {
        let click = TelemetryEvent::new("node_opened").with_node("N1");
        assert_eq!(logical_id(&click), None);

        let read = TelemetryEvent::new("block_read")
            .with_node("N1")
            .with_data(json!({"block_id": "B2"}));
        let id = logical_id(&read).unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(logical_id(&read.clone().at(Utc::now())), Some(id));
    }

    #[test]
    fn scroll_samples_in_same_step_collide() {
        let sample = |percent: f64| {
            TelemetryEvent::new("scroll_sample")
                .with_node("N1")
                .with_data(json!({"percent": percent, "viewport": 900}))
        };
        assert_eq!(logical_id(&sample(51.0)), logical_id(&sample(74.9)));
        assert_ne!(logical_id(&sample(51.0)), logical_id(&sample(75.0)));
    }

    #[test]
    fn correlation_ids_separate_events() {
        let read = |node: &str| {
            TelemetryEvent::new("block_read")
                .with_node(node)
                .with_data(json!({"block_id": "B2"}))
        };
        assert_ne!(logical_id(&read("N1")), logical_id(&read("N2")));
    }

    #[test]
    fn serializes_type_field_and_skips_empty_ids() {
        let event = TelemetryEvent::new("path_opened").with_path("P1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "path_opened");
        assert_eq!(value["path_id"], "P1");
        assert!(value.get("node_id").is_none());
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
    }
}
