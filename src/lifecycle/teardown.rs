//! Ordered queues of deferred cleanup work.
//!
//! Actions run in registration order. Each one is isolated: an error or a
//! panic is recorded and the queue moves on to the next action.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::errors::{HarnessError, Result};

type TeardownFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// One named piece of deferred cleanup
pub struct TeardownAction {
    label: String,
    run: TeardownFn,
}

impl TeardownAction {
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self { label: label.into(), run: Box::new(move || action().boxed()) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for TeardownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownAction").field("label", &self.label).finish()
    }
}

/// FIFO queue of teardown actions
#[derive(Debug, Default)]
pub struct TeardownQueue {
    actions: VecDeque<TeardownAction>,
}

impl TeardownQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: TeardownAction) {
        self.actions.push_back(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every queued action in registration order, leaving the queue empty
    pub async fn drain(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        while let Some(action) = self.actions.pop_front() {
            let TeardownAction { label, run } = action;

            // Building the future can panic too, so it is caught along with polling it
            let outcome = AssertUnwindSafe(async move { run().await }).catch_unwind().await;

            match outcome {
                Ok(Ok(())) => debug!(action = %label, "Teardown action completed"),
                Ok(Err(e)) => {
                    warn!(action = %label, error = %e, "Teardown action failed");
                    report.failures.push((label.clone(), e));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(action = %label, panic = %message, "Teardown action panicked");
                    let error = HarnessError::TeardownPanic { label: label.clone(), message };
                    report.failures.push((label.clone(), error));
                }
            }
            report.executed.push(label);
        }

        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// What happened while draining a teardown queue
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Labels of every action that ran, in order
    pub executed: Vec<String>,
    /// Actions that returned an error or panicked
    pub failures: Vec<(String, HarnessError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: TeardownReport) {
        self.executed.extend(other.executed);
        self.failures.extend(other.failures);
    }

    /// Collapse into the first failure, if any
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }
}
