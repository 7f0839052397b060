use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::{stage_label, JobId, JobRecord, JobStatus};

/// Provisional collection id for the entity a job is building.
pub fn placeholder_id(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// A learning path as returned by the entity endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntity {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathEntity {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: None,
            extra: Map::new(),
        }
    }
}

/// Optimistic stand-in shown while a job builds its entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub id: String,
    pub job_id: JobId,
    pub title: String,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub stage_label: String,
    pub progress: u8,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl Placeholder {
    pub fn for_record(record: &JobRecord, title: impl Into<String>) -> Self {
        let mut placeholder = Self {
            id: placeholder_id(&record.id),
            job_id: record.id.clone(),
            title: title.into(),
            status: record.status,
            stage: None,
            stage_label: String::new(),
            progress: 0,
            message: None,
            error: None,
        };
        placeholder.sync_from(record);
        placeholder
    }

    /// Copies the record's display fields onto the placeholder.
    pub fn sync_from(&mut self, record: &JobRecord) {
        self.status = record.status;
        self.stage = record.stage.clone();
        self.stage_label = match record.status {
            JobStatus::Succeeded => "Ready".to_string(),
            JobStatus::Failed => "Failed".to_string(),
            JobStatus::Canceled => "Canceled".to_string(),
            JobStatus::Queued | JobStatus::Running => {
                stage_label(record.stage.as_deref()).to_string()
            }
        };
        self.progress = record.progress;
        self.message = record.message.clone();
        self.error = record.error.clone();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityRow {
    Placeholder(Placeholder),
    Canonical(PathEntity),
}

impl EntityRow {
    pub fn id(&self) -> &str {
        match self {
            EntityRow::Placeholder(p) => &p.id,
            EntityRow::Canonical(e) => &e.id,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, EntityRow::Placeholder(_))
    }
}

/// Ordered collection of paths, newest first. Ids are unique.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityCollection {
    rows: Vec<EntityRow>,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[EntityRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&EntityRow> {
        self.rows.iter().find(|row| row.id() == id)
    }

    pub fn placeholder_mut(&mut self, id: &str) -> Option<&mut Placeholder> {
        self.rows.iter_mut().find_map(|row| match row {
            EntityRow::Placeholder(p) if p.id == id => Some(p),
            _ => None,
        })
    }

    /// Replaces the row with the same id in place, or prepends a new one.
    pub fn upsert(&mut self, row: EntityRow) {
        match self.position(row.id()) {
            Some(idx) => self.rows[idx] = row,
            None => self.rows.insert(0, row),
        }
    }

    /// Swaps `old_id` for `row` in one step.
    ///
    /// If `row`'s id is already present elsewhere that row is updated and
    /// `old_id` removed, so the collection never holds both.
    pub fn replace(&mut self, old_id: &str, row: EntityRow) {
        let existing = self.position(row.id());
        let old = self.position(old_id);
        match (existing, old) {
            (Some(idx), Some(old_idx)) if idx != old_idx => {
                self.rows[idx] = row;
                self.rows.remove(old_idx);
            }
            (_, Some(old_idx)) => self.rows[old_idx] = row,
            (Some(idx), None) => self.rows[idx] = row,
            (None, None) => self.rows.insert(0, row),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<EntityRow> {
        let idx = self.position(id)?;
        Some(self.rows.remove(idx))
    }

    /// Replaces every canonical row with `entities`, keeping the placeholders
    /// accepted by `keep` ahead of them. Duplicate ids in `entities` collapse
    /// to the first occurrence.
    pub fn replace_canonical<F>(&mut self, entities: Vec<PathEntity>, keep: F)
    where
        F: Fn(&Placeholder) -> bool,
    {
        let mut rows: Vec<EntityRow> = self
            .rows
            .drain(..)
            .filter(|row| match row {
                EntityRow::Placeholder(p) => keep(p),
                EntityRow::Canonical(_) => false,
            })
            .collect();
        for entity in entities {
            if !rows.iter().any(|row| row.id() == entity.id) {
                rows.push(EntityRow::Canonical(entity));
            }
        }
        self.rows = rows;
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id() == id)
    }
}
