//! CLI definitions for marksync.

use clap::{Parser, Subcommand};

use marksync_infra::jobs::ANALYSIS_MAX_ATTEMPTS;

/// Operator tool for the bookmark analysis queue.
///
/// Backend and queue settings come from the `QUEUE_*` environment variables.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "Inspect and feed the bookmark analysis queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Queue name (overrides QUEUE_NAME)
    #[arg(long, global = true)]
    pub queue: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Queue an analysis job for a bookmark
    Submit {
        /// Bookmark id
        bookmark_id: String,

        /// Attempts before the job is dropped
        #[arg(long, default_value_t = ANALYSIS_MAX_ATTEMPTS)]
        max_attempts: u32,
    },

    /// Print queue depth as JSON
    Stats,

    /// Remove every pending and in-flight job
    Clear,

    /// Print which store backend is selected
    Backend,
}
