//! Tracing and logging setup shared by wallet binaries.

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize process-wide logging with JSON output and `RUST_LOG` filtering
/// (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LogConfig::default());
}

/// Initialize with an explicit configuration. Also a no-op when a subscriber
/// is already installed.
pub fn init_with(config: &LogConfig) {
    tracing::init(config);
}
