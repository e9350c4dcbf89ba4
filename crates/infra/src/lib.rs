//! Infrastructure layer: job stores, queue orchestration, config.

pub mod config;
pub mod jobs;
