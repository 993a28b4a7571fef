//! Declarative per-fixture options.

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, Result};
use crate::isolation::IsolationPolicy;
use crate::observability::LoggerKind;

/// Options a fixture declares once for all of its tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureOptions {
    pub database: IsolationPolicy,
    /// Unset means the configured `logging.default_logger`
    pub logger: Option<LoggerKind>,
}

impl FixtureOptions {
    pub fn new(database: IsolationPolicy) -> Self {
        Self { database, logger: None }
    }

    pub fn with_logger(mut self, logger: LoggerKind) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Parse attribute-style `key = value` pairs, e.g.
    /// `[("Database", "NewSchemaPerTest"), ("Logger", "Console")]`.
    ///
    /// Keys and values are case-insensitive. Anything unrecognized is a
    /// configuration error.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();

        for (key, value) in pairs {
            match key.trim().to_ascii_lowercase().as_str() {
                "database" => options.database = value.parse()?,
                "logger" => options.logger = Some(value.parse()?),
                _ => return Err(HarnessError::unknown_option(key, value)),
            }
        }

        Ok(options)
    }
}
