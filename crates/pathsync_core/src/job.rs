use serde_json::Value;

pub type JobId = String;

/// The one job family this layer reconciles.
pub const LEARNING_BUILD: &str = "learning_build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Parses the status strings the server uses. Unknown strings yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" | "created" => Some(JobStatus::Queued),
            "running" | "in_progress" | "processing" => Some(JobStatus::Running),
            "succeeded" | "success" | "completed" | "done" => Some(JobStatus::Succeeded),
            "failed" | "error" => Some(JobStatus::Failed),
            "canceled" | "cancelled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled => 2,
        }
    }
}

/// Human label for a stage tag. Unknown tags are shown verbatim.
pub fn stage_label(stage: Option<&str>) -> &str {
    match stage {
        None => "Waiting to start",
        Some("upload") => "Uploading materials",
        Some("extract_text") => "Reading materials",
        Some("chunk_text") => "Splitting content",
        Some("embed_chunks") => "Indexing content",
        Some("outline") => "Drafting outline",
        Some("generate_nodes") => "Writing lessons",
        Some("generate_activities") => "Creating activities",
        Some("finalize") => "Finishing up",
        Some(other) => other,
    }
}

/// Stored progress for a raw wire value: numbers and numeric strings are
/// clamped to `[0, 100]` and floored; anything else is 0.
pub fn clamp_progress(raw: &Value) -> u8 {
    let number = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => n.clamp(0.0, 100.0).floor() as u8,
        _ => 0,
    }
}

/// Progress rounded down to a multiple of 5.
pub fn progress_bucket(progress: u8) -> u8 {
    progress / 5 * 5
}

/// A normalized change to a job, produced from either a push event or a pull
/// snapshot. `None` fields leave the record untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobUpdate {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub stage: Option<String>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    pub changed: bool,
    pub became_terminal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl JobRecord {
    pub fn new(id: impl Into<JobId>, job_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            status: JobStatus::Queued,
            stage: None,
            progress: 0,
            message: None,
            error: None,
            result: None,
        }
    }

    /// Merges an update into the record.
    ///
    /// Status only moves forward (queued, running, terminal). Once the record
    /// is terminal only the message and error text can change, so replaying a
    /// terminal update or a stale progress update is a no-op for status.
    pub fn apply(&mut self, update: &JobUpdate) -> Applied {
        if self.status.is_terminal() {
            let mut changed = false;
            if let Some(message) = &update.message {
                changed |= replace_if_different(&mut self.message, message);
            }
            if let Some(error) = &update.error {
                changed |= replace_if_different(&mut self.error, error);
            }
            return Applied {
                changed,
                became_terminal: false,
            };
        }

        let before = self.clone();
        if self.job_type.is_empty() {
            if let Some(job_type) = &update.job_type {
                self.job_type = job_type.clone();
            }
        }
        if let Some(status) = update.status {
            if status.rank() >= self.status.rank() {
                self.status = status;
            }
        }
        if let Some(stage) = &update.stage {
            self.stage = Some(stage.clone());
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if self.status == JobStatus::Succeeded {
            self.progress = 100;
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }

        Applied {
            changed: *self != before,
            became_terminal: self.status.is_terminal(),
        }
    }

    /// Canonical entity id carried by a succeeded job's result payload.
    pub fn result_entity_id(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        ["path_id", "entity_id", "id"].iter().find_map(|key| {
            match result.get(key)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }

    pub fn progress_bucket(&self) -> u8 {
        progress_bucket(self.progress)
    }
}

fn replace_if_different(slot: &mut Option<String>, value: &str) -> bool {
    if slot.as_deref() == Some(value) {
        false
    } else {
        *slot = Some(value.to_string());
        true
    }
}
