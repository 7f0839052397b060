//! Plain-text lines describing what changed between two view models.

use chrono::Local;
use pathsync_core::{EntityRow, JobRowView, SyncViewModel};

pub fn changes(previous: &SyncViewModel, current: &SyncViewModel) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.connection != current.connection {
        lines.push(format!("connection: {:?}", current.connection));
    }

    for job in &current.jobs {
        let before = previous.jobs.iter().find(|old| old.job_id == job.job_id);
        if before != Some(job) {
            lines.push(job_line(job));
        }
    }
    for job in &previous.jobs {
        if !current.jobs.iter().any(|now| now.job_id == job.job_id) {
            lines.push(format!("job {} resolved", job.job_id));
        }
    }

    for row in &current.entities {
        if let EntityRow::Canonical(entity) = row {
            if !previous.entities.iter().any(|old| old.id() == entity.id) {
                lines.push(format!("path {} ready: {}", entity.id, entity.title));
            }
        }
    }

    let stamp = Local::now().format("%H:%M:%S");
    lines
        .into_iter()
        .map(|line| format!("[{stamp}] {line}"))
        .collect()
}

fn job_line(job: &JobRowView) -> String {
    let mut line = format!(
        "job {} {} {:>3}% {}",
        job.job_id,
        job.status.as_str(),
        job.progress,
        job.stage_label
    );
    if let Some(message) = &job.message {
        line.push_str(" | ");
        line.push_str(message);
    }
    if let Some(error) = &job.error {
        line.push_str(" | error: ");
        line.push_str(error);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathsync_core::{ConnectionStatus, JobStatus, PathEntity};

    fn row(status: JobStatus, progress: u8) -> JobRowView {
        JobRowView {
            job_id: "J1".into(),
            status,
            stage_label: "Embedding chunks".into(),
            progress,
            message: None,
            error: None,
        }
    }

    fn strip(lines: Vec<String>) -> Vec<String> {
        lines
            .into_iter()
            .map(|line| line.split_once("] ").map(|(_, rest)| rest.to_string()).unwrap_or(line))
            .collect()
    }

    #[test]
    fn unchanged_view_prints_nothing() {
        let view = SyncViewModel {
            jobs: vec![row(JobStatus::Running, 40)],
            ..SyncViewModel::default()
        };
        assert!(changes(&view, &view.clone()).is_empty());
    }

    #[test]
    fn reports_connection_job_and_entity_changes() {
        let before = SyncViewModel {
            jobs: vec![row(JobStatus::Running, 40)],
            ..SyncViewModel::default()
        };
        let after = SyncViewModel {
            connection: ConnectionStatus::Open,
            jobs: Vec::new(),
            entities: vec![EntityRow::Canonical(PathEntity::new("P9", "Linear algebra"))],
            ..SyncViewModel::default()
        };
        assert_eq!(
            strip(changes(&before, &after)),
            vec![
                "connection: Open",
                "job J1 resolved",
                "path P9 ready: Linear algebra",
            ]
        );
    }

    #[test]
    fn job_progress_line_includes_error() {
        let mut failed = row(JobStatus::Failed, 60);
        failed.error = Some("quota exceeded".into());
        let after = SyncViewModel {
            jobs: vec![failed],
            ..SyncViewModel::default()
        };
        assert_eq!(
            strip(changes(&SyncViewModel::default(), &after)),
            vec!["job J1 failed  60% Embedding chunks | error: quota exceeded"]
        );
    }
}
