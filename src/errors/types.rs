//! # Error Types
//!
//! Error types for the test database harness using `thiserror`.

use std::fmt;

use crate::runtime::RuntimeLevel;
use crate::storage::DatabaseKind;

/// Custom result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Main error type for the test database harness
#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A declarative fixture option carried a value outside its recognized set
    #[error("Unrecognized value '{value}' for fixture option '{option}'")]
    UnknownOption { option: String, value: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// The pool could not hand out a database
    #[error("Provisioning error ({kind}): {message}")]
    Provisioning { kind: DatabaseKind, message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// The system under test reported the wrong runtime level after configuration
    #[error(
        "Runtime level mismatch for database '{database}': expected {expected}, found {actual}"
    )]
    RuntimeLevelMismatch { database: String, expected: RuntimeLevel, actual: RuntimeLevel },

    /// Harness state that should be impossible was observed
    #[error("Invariant violated: {message}")]
    Invariant { message: String },

    /// A teardown action panicked
    #[error("Teardown action '{label}' panicked: {message}")]
    TeardownPanic { label: String, message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Broad classes used when reporting failures to the test runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Provisioning,
    Invariant,
    Storage,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Provisioning => write!(f, "provisioning"),
            ErrorCategory::Invariant => write!(f, "invariant"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

impl HarnessError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an unrecognized option error
    pub fn unknown_option<O: Into<String>, V: Into<String>>(option: O, value: V) -> Self {
        Self::UnknownOption { option: option.into(), value: value.into() }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io { source, context: context.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a provisioning error
    pub fn provisioning<S: Into<String>>(kind: DatabaseKind, message: S) -> Self {
        Self::Provisioning { kind, message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create an invariant violation
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::Invariant { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Add context to an error (used by the `ResultExt` trait)
    pub(crate) fn add_context(&mut self, context: String) {
        match self {
            HarnessError::Io { context: ref mut ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            HarnessError::Database { context: ref mut ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            HarnessError::Provisioning { message: ref mut msg, .. } => {
                *msg = format!("{}: {}", context, msg);
            }
            _ => {}
        }
    }

    /// Which class of failure this is
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarnessError::Config { .. }
            | HarnessError::UnknownOption { .. }
            | HarnessError::Validation { .. } => ErrorCategory::Configuration,
            HarnessError::Provisioning { .. } | HarnessError::Timeout { .. } => {
                ErrorCategory::Provisioning
            }
            HarnessError::RuntimeLevelMismatch { .. } | HarnessError::Invariant { .. } => {
                ErrorCategory::Invariant
            }
            HarnessError::Database { .. } | HarnessError::Io { .. } => ErrorCategory::Storage,
            HarnessError::TeardownPanic { .. } | HarnessError::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if a failed database build should be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarnessError::Database { .. } | HarnessError::Io { .. } | HarnessError::Timeout { .. }
        )
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for HarnessError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for HarnessError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = HarnessError::config("Test configuration error");
        assert!(matches!(error, HarnessError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_unknown_option_message() {
        let error = HarnessError::unknown_option("Database", "NewSchemaPerSuite");
        assert_eq!(
            error.to_string(),
            "Unrecognized value 'NewSchemaPerSuite' for fixture option 'Database'"
        );
        assert_eq!(error.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            HarnessError::provisioning(DatabaseKind::Schema, "exhausted").category(),
            ErrorCategory::Provisioning
        );
        assert_eq!(HarnessError::timeout("attach", 10).category(), ErrorCategory::Provisioning);
        assert_eq!(
            HarnessError::RuntimeLevelMismatch {
                database: "db".to_string(),
                expected: RuntimeLevel::Run,
                actual: RuntimeLevel::Install,
            }
            .category(),
            ErrorCategory::Invariant
        );
        assert_eq!(HarnessError::internal("boom").category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(HarnessError::timeout("build", 1000).is_retryable());
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(HarnessError::from(io_error).is_retryable());
        assert!(!HarnessError::validation("test").is_retryable());
        assert!(!HarnessError::provisioning(DatabaseKind::Empty, "gone").is_retryable());
    }

    #[test]
    fn test_add_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mut error: HarnessError = io_error.into();
        error.add_context("Removing database file".to_string());
        assert_eq!(error.to_string(), "I/O error: Removing database file: I/O operation failed");
    }
}
