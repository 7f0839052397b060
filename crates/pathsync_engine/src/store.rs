use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::persist::{AtomicFileWriter, PersistError};
use crate::telemetry::TelemetryEvent;

/// Durable home of the unsent telemetry buffer.
pub trait TelemetryStore: Send + Sync {
    fn load(&self) -> Result<Vec<TelemetryEvent>, PersistError>;
    fn save(&self, events: &[TelemetryEvent]) -> Result<(), PersistError>;
}

/// JSON array in a single file. A missing file reads as an empty buffer.
///
/// The state directory is checked on the first load or save only; later
/// saves are a temp file write plus rename.
#[derive(Debug)]
pub struct FileTelemetryStore {
    writer: AtomicFileWriter,
    dir_ready: AtomicBool,
}

impl FileTelemetryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(path),
            dir_ready: AtomicBool::new(false),
        }
    }

    fn ensure_dir(&self) -> Result<(), PersistError> {
        if !self.dir_ready.load(Ordering::Acquire) {
            self.writer.prepare()?;
            self.dir_ready.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl TelemetryStore for FileTelemetryStore {
    fn load(&self) -> Result<Vec<TelemetryEvent>, PersistError> {
        self.ensure_dir()?;
        match fs::read_to_string(self.writer.target()) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, events: &[TelemetryEvent]) -> Result<(), PersistError> {
        self.ensure_dir()?;
        let content = serde_json::to_string(events)?;
        self.writer.write(&content)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryStore for MemoryTelemetryStore {
    fn load(&self) -> Result<Vec<TelemetryEvent>, PersistError> {
        Ok(self.snapshot())
    }

    fn save(&self, events: &[TelemetryEvent]) -> Result<(), PersistError> {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = events.to_vec();
        Ok(())
    }
}
