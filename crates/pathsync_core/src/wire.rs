//! Server message shapes: push-channel messages and pull snapshots.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{clamp_progress, JobId, JobStatus, JobUpdate};

/// One message from the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub event: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl PushMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Created,
    Progress,
    Done,
    Failed,
    Canceled,
}

impl JobEventKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "jobcreated" => Some(JobEventKind::Created),
            "jobprogress" => Some(JobEventKind::Progress),
            "jobdone" => Some(JobEventKind::Done),
            "jobfailed" => Some(JobEventKind::Failed),
            "jobcanceled" | "jobcancelled" => Some(JobEventKind::Canceled),
            _ => None,
        }
    }
}

/// A push message recognized as a job event.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: JobId,
    pub job_type: Option<String>,
    pub update: JobUpdate,
}

/// Extracts a job event from a push message.
///
/// The job body is read from `data.job` when present, otherwise from `data`
/// itself. Returns `None` for non-job events and bodies without a job id.
pub fn parse_job_event(message: &PushMessage) -> Option<JobEvent> {
    let kind = JobEventKind::from_event_name(&message.event)?;
    let data = message.data.as_ref()?;
    let body = match data.get("job") {
        Some(job) if job.is_object() => job,
        _ => data,
    };

    let job_id = string_field(body, &["id", "job_id"])?;
    let job_type = string_field(body, &["job_type", "type"]);
    let explicit = string_field(body, &["status"]).and_then(|s| JobStatus::parse(&s));
    let status = match kind {
        JobEventKind::Created => explicit.or(Some(JobStatus::Queued)),
        JobEventKind::Progress => match explicit {
            Some(status) if status.is_terminal() => Some(status),
            _ => Some(JobStatus::Running),
        },
        JobEventKind::Done => Some(JobStatus::Succeeded),
        JobEventKind::Failed => Some(JobStatus::Failed),
        JobEventKind::Canceled => Some(JobStatus::Canceled),
    };

    let message_text = string_field(body, &["message"]);
    let mut error = string_field(body, &["error"]);
    if kind == JobEventKind::Failed && error.is_none() {
        error = message_text.clone();
    }

    Some(JobEvent {
        kind,
        job_id,
        job_type: job_type.clone(),
        update: JobUpdate {
            job_type,
            status,
            stage: string_field(body, &["stage"]),
            progress: body
                .get("progress")
                .filter(|v| !v.is_null())
                .map(clamp_progress),
            message: message_text,
            error,
            result: body.get("result").filter(|v| !v.is_null()).cloned(),
        },
    })
}

/// Point-in-time job state returned by the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl JobSnapshot {
    pub fn to_update(&self) -> JobUpdate {
        JobUpdate {
            job_type: self.job_type.clone(),
            status: self.status.as_deref().and_then(JobStatus::parse),
            stage: self.stage.clone(),
            progress: self
                .progress
                .as_ref()
                .filter(|v| !v.is_null())
                .map(clamp_progress),
            message: self.message.clone(),
            error: self.error.clone(),
            result: self.result.clone().filter(|v| !v.is_null()),
        }
    }
}

fn string_field(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match body.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(event: &str, data: Value) -> PushMessage {
        PushMessage {
            event: event.to_string(),
            channel: String::new(),
            data: Some(data),
        }
    }

    #[test]
    fn reads_nested_job_body() {
        let msg = message(
            "jobcreated",
            json!({"job": {"id": "J1", "job_type": "learning_build", "status": "queued"}}),
        );
        let event = parse_job_event(&msg).unwrap();
        assert_eq!(event.kind, JobEventKind::Created);
        assert_eq!(event.job_id, "J1");
        assert_eq!(event.job_type.as_deref(), Some("learning_build"));
        assert_eq!(event.update.status, Some(JobStatus::Queued));
        assert_eq!(event.update.progress, None);
    }

    #[test]
    fn reads_flat_body_and_clamps_progress() {
        let msg = message(
            "jobprogress",
            json!({"job_id": "J1", "stage": "embed_chunks", "progress": 140}),
        );
        let event = parse_job_event(&msg).unwrap();
        assert_eq!(event.update.status, Some(JobStatus::Running));
        assert_eq!(event.update.progress, Some(100));
    }

    #[test]
    fn failed_event_uses_message_as_error() {
        let msg = message("jobfailed", json!({"job": {"id": "J1", "message": "no text"}}));
        let event = parse_job_event(&msg).unwrap();
        assert_eq!(event.update.error.as_deref(), Some("no text"));
    }

    #[test]
    fn ignores_other_events_and_missing_ids() {
        assert!(parse_job_event(&message("profileupdated", json!({"id": "U1"}))).is_none());
        assert!(parse_job_event(&message("jobdone", json!({"job": {"status": "x"}}))).is_none());
        let empty = PushMessage {
            event: "jobdone".into(),
            channel: String::new(),
            data: None,
        };
        assert!(parse_job_event(&empty).is_none());
    }

    #[test]
    fn push_message_parses_without_channel() {
        let msg = PushMessage::parse(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(msg.channel, "");
        assert!(msg.data.is_none());
        assert!(PushMessage::parse("not json").is_err());
    }
}
