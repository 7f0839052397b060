mod config;
mod logging;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pathsync_engine::{Collaborators, StaticToken, SyncSession};
use sync_logging::sync_info;

#[derive(Parser)]
#[command(name = "pathsync")]
#[command(about = "Follow learning-path build jobs live")]
struct Cli {
    /// RON config file; defaults to ./pathsync.ron when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bearer credential for the platform API.
    #[arg(long, env = "PATHSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Job ids to track.
    job_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    logging::initialize(
        config.log.destination,
        sync_logging::parse_level(&config.log.level),
        &config.log.file,
    );

    let settings = config.session_settings();
    let credentials = Arc::new(StaticToken::new(cli.token.unwrap_or_default()));
    let collaborators = Collaborators::http(&settings, credentials)
        .with_context(|| format!("connecting to {}", settings.api_base))?;
    sync_info!("Starting sync session against {}", settings.api_base);
    let session = SyncSession::start(settings, collaborators);
    for job_id in cli.job_ids {
        session.track_job(job_id);
    }

    let mut view = session.view();
    let mut previous = view.borrow_and_update().clone();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                for line in render::changes(&previous, &current) {
                    println!("{line}");
                }
                previous = current;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
