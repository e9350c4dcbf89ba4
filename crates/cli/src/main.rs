//! marksync - operator CLI for the bookmark analysis queue.

mod cli;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use marksync_core::{BookmarkId, DomainError};
use marksync_infra::config::QueueConfig;
use marksync_infra::jobs::{JobStore, NewJob, QueueService, select_backend};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    marksync_observability::init_pretty();

    let cli = Cli::parse();

    let mut config = QueueConfig::from_env().context("invalid queue configuration")?;
    if let Some(queue) = cli.queue {
        config.queue_name = queue;
    }

    let backend = select_backend(&config)
        .await
        .context("failed to open queue backend")?;
    let service = QueueService::from_config(backend, &config);

    match cli.command {
        Commands::Submit {
            bookmark_id,
            max_attempts,
        } => {
            if max_attempts == 0 {
                return Err(DomainError::validation("--max-attempts must be at least 1").into());
            }
            let bookmark_id = BookmarkId::new(bookmark_id)?;
            let job = NewJob::analyze_bookmark(&bookmark_id, max_attempts);
            let job_id = service
                .submit(job.kind, job.payload, job.max_attempts)
                .await
                .context("failed to queue job")?;
            info!(job_id = %job_id, bookmark_id = %bookmark_id, "job queued");
            println!("{}", job_id);
        }
        Commands::Stats => {
            let stats = service.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Clear => {
            service.clear().await.context("failed to clear queue")?;
            println!("cleared {}", config.queue_name);
        }
        Commands::Backend => {
            println!("{}", service.store().backend());
        }
    }

    Ok(())
}
