//! Tracing/logging setup shared by convoy binaries.

/// Initialize process-wide observability using `CONVOY_LOG_FORMAT`
/// (`json` by default, `pretty` for local development).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use crate::tracing::LogFormat;
