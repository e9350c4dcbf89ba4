//! Tracing and logging setup shared by the marksync binaries.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Same as [`init`], but with human-readable output (for interactive tools).
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}

pub use self::tracing::LogFormat;

/// Tracing configuration (filters, layers).
pub mod tracing;
