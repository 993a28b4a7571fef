//! # Isolation Policy Resolver
//!
//! Decides, for one test in one fixture, what the pool should be asked for.
//! The decision is a pure function of the configured [`IsolationPolicy`] and
//! the fixture's [`FixtureState`]; the lifecycle coordinator carries it out.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, Result};
use crate::runtime::RuntimeLevel;
use crate::storage::{DatabaseHandle, DatabaseKind};

/// How a fixture isolates its tests' databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IsolationPolicy {
    /// The fixture needs no database
    #[default]
    None,
    NewSchemaPerTest,
    NewEmptyPerTest,
    NewSchemaPerFixture,
    NewEmptyPerFixture,
}

/// How long an attached database lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseScope {
    Test,
    Fixture,
}

impl IsolationPolicy {
    pub const ALL: [IsolationPolicy; 5] = [
        IsolationPolicy::None,
        IsolationPolicy::NewSchemaPerTest,
        IsolationPolicy::NewEmptyPerTest,
        IsolationPolicy::NewSchemaPerFixture,
        IsolationPolicy::NewEmptyPerFixture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationPolicy::None => "None",
            IsolationPolicy::NewSchemaPerTest => "NewSchemaPerTest",
            IsolationPolicy::NewEmptyPerTest => "NewEmptyPerTest",
            IsolationPolicy::NewSchemaPerFixture => "NewSchemaPerFixture",
            IsolationPolicy::NewEmptyPerFixture => "NewEmptyPerFixture",
        }
    }

    /// Pool the policy draws from, `None` for the no-database policy
    pub fn database_kind(&self) -> Option<DatabaseKind> {
        match self {
            IsolationPolicy::None => None,
            IsolationPolicy::NewSchemaPerTest | IsolationPolicy::NewSchemaPerFixture => {
                Some(DatabaseKind::Schema)
            }
            IsolationPolicy::NewEmptyPerTest | IsolationPolicy::NewEmptyPerFixture => {
                Some(DatabaseKind::Empty)
            }
        }
    }

    pub fn scope(&self) -> Option<DatabaseScope> {
        match self {
            IsolationPolicy::None => None,
            IsolationPolicy::NewSchemaPerTest | IsolationPolicy::NewEmptyPerTest => {
                Some(DatabaseScope::Test)
            }
            IsolationPolicy::NewSchemaPerFixture | IsolationPolicy::NewEmptyPerFixture => {
                Some(DatabaseScope::Fixture)
            }
        }
    }

    /// Runtime level the system under test must report once configured.
    ///
    /// Only the per-test policies carry this guarantee: a fixture-scoped
    /// database may legitimately be installed into by an earlier test.
    pub fn expected_level(&self) -> Option<RuntimeLevel> {
        match self {
            IsolationPolicy::NewSchemaPerTest => Some(RuntimeLevel::Run),
            IsolationPolicy::NewEmptyPerTest => Some(RuntimeLevel::Install),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationPolicy {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        IsolationPolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| HarnessError::unknown_option("Database", s))
    }
}

/// What a fixture knows about its own progress
#[derive(Debug, Clone)]
pub struct FixtureState {
    is_first_test: bool,
    database: Option<DatabaseHandle>,
}

impl Default for FixtureState {
    fn default() -> Self {
        Self { is_first_test: true, database: None }
    }
}

impl FixtureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until the first test of the fixture has completed
    pub fn is_first_test(&self) -> bool {
        self.is_first_test
    }

    /// Fixture-scoped database, once attached
    pub fn database(&self) -> Option<&DatabaseHandle> {
        self.database.as_ref()
    }

    pub(crate) fn complete_test(&mut self) {
        self.is_first_test = false;
    }

    pub(crate) fn cache_database(&mut self, database: DatabaseHandle) {
        self.database = Some(database);
    }

    pub(crate) fn take_database(&mut self) -> Option<DatabaseHandle> {
        self.database.take()
    }
}

/// The pool interaction one test needs
#[derive(Debug, Clone)]
pub enum DatabasePlan {
    /// No pool interaction at all
    Skip,
    /// Attach now, detach after this test
    AttachForTest(DatabaseKind),
    /// Attach now, detach after the fixture
    AttachForFixture(DatabaseKind),
    /// Keep using the database the fixture already holds
    ReuseFixture(DatabaseHandle),
}

impl DatabasePlan {
    /// Whether carrying out the plan calls attach
    pub fn attaches(&self) -> bool {
        matches!(self, DatabasePlan::AttachForTest(_) | DatabasePlan::AttachForFixture(_))
    }
}

/// Resolve the plan for the next test of a fixture.
///
/// A per-fixture policy attaches only on the first test. A later test with
/// no cached database means the first attach failed; attaching again could
/// leave an unreleased database behind and starve the pool, so it is
/// reported as a provisioning error instead.
pub fn resolve(policy: IsolationPolicy, state: &FixtureState) -> Result<DatabasePlan> {
    let (kind, scope) = match (policy.database_kind(), policy.scope()) {
        (Some(kind), Some(scope)) => (kind, scope),
        _ => return Ok(DatabasePlan::Skip),
    };

    match scope {
        DatabaseScope::Test => Ok(DatabasePlan::AttachForTest(kind)),
        DatabaseScope::Fixture => match state.database() {
            Some(database) => Ok(DatabasePlan::ReuseFixture(database.clone())),
            None if state.is_first_test() => Ok(DatabasePlan::AttachForFixture(kind)),
            None => Err(HarnessError::provisioning(
                kind,
                format!(
                    "{} fixture has no database after its first test; not attaching again",
                    policy
                ),
            )),
        },
    }
}
