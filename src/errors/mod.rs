//! # Error Handling
//!
//! Error handling for the test database harness. The taxonomy follows what a
//! test runner needs to know about a failure: bad configuration, a pool that
//! could not provision, or a broken invariant between tests.

mod types;

pub use types::{ErrorCategory, HarnessError, Result};

/// Attach context to errors as they cross module boundaries
pub trait ResultExt<T> {
    /// Prefix the error's context with a lazily built message
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<HarnessError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let mut error = e.into();
            error.add_context(f());
            error
        })
    }
}
