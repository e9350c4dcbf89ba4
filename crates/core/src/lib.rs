//! `marksync-core` - identifiers and error primitives shared by the queue crates.
//!
//! This crate is **pure** (no I/O, no async runtime).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BookmarkId, JobId};
