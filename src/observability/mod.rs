//! # Observability
//!
//! Structured logging for fixtures and the background pool builders.

pub mod logging;

pub use logging::{LoggerFactory, LoggerKind};

use crate::config::LoggingConfig;

/// Install a process-wide default dispatcher for work that runs outside any
/// fixture, such as the pool builder workers.
///
/// Returns `false` if a global dispatcher was already installed; the existing
/// one is kept.
pub fn init_global_logging(kind: LoggerKind, config: &LoggingConfig) -> bool {
    let factory = LoggerFactory::create(kind, config);
    let installed = tracing::dispatcher::set_global_default(factory.dispatch().clone()).is_ok();

    if installed {
        // The file writer guard must outlive the process-wide dispatcher
        std::mem::forget(factory);
        tracing::info!(logger = %kind, "Global harness logging initialized");
    }

    installed
}
