//! # Structured Logging
//!
//! Per-fixture logging backends built on the tracing ecosystem.
//!
//! A fixture picks a [`LoggerKind`]; [`LoggerFactory::create`] turns it into a
//! `tracing::Dispatch` the lifecycle coordinator runs its work under. Logging
//! is diagnostic only, so a backend that fails to build degrades to the no-op
//! `Mock` logger instead of failing the fixture.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::{HarnessError, Result};

/// Create a tracing span for pool operations.
///
/// ```rust,ignore
/// let span = pool_span!("attach", DatabaseKind::Schema);
/// ```
#[macro_export]
macro_rules! pool_span {
    ($operation:expr, $kind:expr) => {
        tracing::debug_span!(
            "pool_operation",
            operation = %$operation,
            kind = %$kind,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $kind:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "pool_operation",
            operation = %$operation,
            kind = %$kind,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a fixture's lifecycle step
#[macro_export]
macro_rules! fixture_span {
    ($step:expr, $fixture:expr) => {
        tracing::info_span!(
            "fixture_step",
            step = %$step,
            fixture = %$fixture,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Logging backend a fixture can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    /// Discard everything
    #[default]
    Mock,
    /// Daily rolling text file under the log directory
    #[serde(alias = "serilog")]
    File,
    /// Human readable output captured by the test runner
    Console,
}

impl fmt::Display for LoggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggerKind::Mock => write!(f, "mock"),
            LoggerKind::File => write!(f, "file"),
            LoggerKind::Console => write!(f, "console"),
        }
    }
}

impl FromStr for LoggerKind {
    type Err = HarnessError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(LoggerKind::Mock),
            "file" | "serilog" => Ok(LoggerKind::File),
            "console" => Ok(LoggerKind::Console),
            _ => Err(HarnessError::unknown_option("Logger", value)),
        }
    }
}

/// Source of the `tracing` dispatcher a fixture logs through
#[derive(Clone)]
pub struct LoggerFactory {
    kind: LoggerKind,
    dispatch: Dispatch,
    // Flushes the non-blocking file writer when the last clone is dropped
    _guard: Option<Arc<WorkerGuard>>,
}

impl fmt::Debug for LoggerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerFactory").field("kind", &self.kind).finish()
    }
}

impl LoggerFactory {
    /// Build the requested backend, falling back to `Mock` on any error
    pub fn create(kind: LoggerKind, config: &LoggingConfig) -> Self {
        match Self::try_create(kind, config) {
            Ok(factory) => factory,
            Err(e) => {
                tracing::warn!(
                    logger = %kind,
                    error = %e,
                    "Failed to create logger, falling back to mock logger"
                );
                Self::mock()
            }
        }
    }

    /// Build the requested backend, surfacing construction errors
    pub fn try_create(kind: LoggerKind, config: &LoggingConfig) -> Result<Self> {
        match kind {
            LoggerKind::Mock => Ok(Self::mock()),
            LoggerKind::Console => {
                let subscriber = tracing_subscriber::fmt()
                    .with_env_filter(env_filter(&config.log_level)?)
                    .with_test_writer()
                    .finish();
                Ok(Self { kind, dispatch: Dispatch::new(subscriber), _guard: None })
            }
            LoggerKind::File => {
                let appender = RollingBuilder::new()
                    .rotation(Rotation::DAILY)
                    .filename_prefix(&config.file_prefix)
                    .filename_suffix("txt")
                    .build(&config.log_directory)
                    .map_err(|e| {
                        HarnessError::config_with_source(
                            format!(
                                "Failed to open rolling log file in {}",
                                config.log_directory.display()
                            ),
                            Box::new(e),
                        )
                    })?;
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let subscriber = tracing_subscriber::fmt()
                    .with_env_filter(env_filter(&config.log_level)?)
                    .with_writer(writer)
                    .with_ansi(false)
                    .finish();
                Ok(Self {
                    kind,
                    dispatch: Dispatch::new(subscriber),
                    _guard: Some(Arc::new(guard)),
                })
            }
        }
    }

    /// A logger that records nothing
    pub fn mock() -> Self {
        Self {
            kind: LoggerKind::Mock,
            dispatch: Dispatch::new(tracing::subscriber::NoSubscriber::default()),
            _guard: None,
        }
    }

    /// Which backend this factory ended up with
    pub fn kind(&self) -> LoggerKind {
        self.kind
    }

    /// Dispatcher to run fixture work under
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run a synchronous closure with this logger as the default dispatcher
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| {
        HarnessError::config_with_source(format!("Invalid log level '{}'", level), Box::new(e))
    })
}
