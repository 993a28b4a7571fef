//! # Test Lifecycle Coordinator
//!
//! Each test fixture owns one [`TestLifecycleCoordinator`] and drives it
//! through the same protocol:
//!
//! ```text
//! new(fixture options)
//!   ├── before_test ──► configure(services) ──► test body ──► after_test
//!   ├── before_test ──► configure(services) ──► test body ──► after_test
//!   └── after_fixture
//! ```
//!
//! `configure` resolves the fixture's isolation policy against its state,
//! attaches a database from the pool when the policy calls for one, points
//! the system under test at it and checks the runtime level it reports.
//! Releasing the database is queued as a teardown action at the scope the
//! policy asks for: after the test or after the fixture.
//!
//! ```rust,ignore
//! let options = FixtureOptions::new(IsolationPolicy::NewSchemaPerTest);
//! let mut fixture = TestLifecycleCoordinator::new("ContentServiceTests", options);
//!
//! fixture.before_test("saves_content")?;
//! let runtime = SqliteRuntime::default();
//! fixture.configure(&runtime).await?;
//! // ... test body ...
//! fixture.after_test().await.into_result()?;
//! fixture.after_fixture().await.into_result()?;
//! ```

mod options;
mod teardown;

pub use options::FixtureOptions;
pub use teardown::{TeardownAction, TeardownQueue, TeardownReport};

use std::sync::Arc;

use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn, Instrument};

use crate::config::LoggingConfig;
use crate::errors::{HarnessError, Result};
use crate::fixture_span;
use crate::isolation::{resolve, DatabasePlan, FixtureState, IsolationPolicy};
use crate::observability::LoggerFactory;
use crate::provisioning::{shared_pool, DatabaseProvider};
use crate::runtime::{DatabaseFactory, RuntimeState, ServiceContext};
use crate::storage::{register_driver, DatabaseHandle};

/// Per-fixture orchestration of database setup and teardown
pub struct TestLifecycleCoordinator {
    fixture_name: String,
    options: FixtureOptions,
    logger: LoggerFactory,
    provider: Option<Arc<dyn DatabaseProvider>>,
    state: FixtureState,
    current_database: Option<DatabaseHandle>,
    current_test: Option<String>,
    test_teardown: TeardownQueue,
    fixture_teardown: TeardownQueue,
}

impl std::fmt::Debug for TestLifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLifecycleCoordinator")
            .field("fixture_name", &self.fixture_name)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("test_teardown", &self.test_teardown.len())
            .field("fixture_teardown", &self.fixture_teardown.len())
            .finish()
    }
}

impl TestLifecycleCoordinator {
    /// Start a fixture. The logger is built from default logging settings
    /// and degrades to the mock logger if it cannot be created.
    pub fn new(fixture_name: impl Into<String>, options: FixtureOptions) -> Self {
        Self::with_logging_config(fixture_name, options, &LoggingConfig::default())
    }

    /// Start a fixture against explicit logging settings. A fixture that
    /// does not choose a logger gets `logging.default_logger`.
    pub fn with_logging_config(
        fixture_name: impl Into<String>,
        options: FixtureOptions,
        logging: &LoggingConfig,
    ) -> Self {
        let logger = options.logger.unwrap_or(logging.default_logger);
        Self {
            fixture_name: fixture_name.into(),
            options,
            logger: LoggerFactory::create(logger, logging),
            provider: None,
            state: FixtureState::new(),
            current_database: None,
            current_test: None,
            test_teardown: TeardownQueue::new(),
            fixture_teardown: TeardownQueue::new(),
        }
    }

    /// Use this provider instead of the process-wide shared pool
    pub fn with_provider(mut self, provider: Arc<dyn DatabaseProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn fixture_name(&self) -> &str {
        &self.fixture_name
    }

    pub fn options(&self) -> FixtureOptions {
        self.options
    }

    pub fn policy(&self) -> IsolationPolicy {
        self.options.database
    }

    pub fn state(&self) -> &FixtureState {
        &self.state
    }

    pub fn logger(&self) -> &LoggerFactory {
        &self.logger
    }

    /// Database the current test is running against
    pub fn database(&self) -> Option<&DatabaseHandle> {
        self.current_database.as_ref()
    }

    pub fn pending_test_teardown(&self) -> usize {
        self.test_teardown.len()
    }

    pub fn pending_fixture_teardown(&self) -> usize {
        self.fixture_teardown.len()
    }

    /// Queue cleanup to run after the current test
    pub fn add_test_teardown(&mut self, action: TeardownAction) {
        self.test_teardown.push(action);
    }

    /// Queue cleanup to run once the whole fixture is done
    pub fn add_fixture_teardown(&mut self, action: TeardownAction) {
        self.fixture_teardown.push(action);
    }

    /// Mark the start of a test.
    ///
    /// Fails if the previous test's teardown never ran, since its database
    /// would otherwise leak into this test.
    pub fn before_test(&mut self, test_name: &str) -> Result<()> {
        if !self.test_teardown.is_empty() {
            return Err(HarnessError::invariant(format!(
                "test '{}' in fixture '{}' started with {} teardown action(s) \
                 from the previous test still queued",
                test_name,
                self.fixture_name,
                self.test_teardown.len()
            )));
        }

        self.current_test = Some(test_name.to_string());
        self.logger.in_scope(|| {
            info!(
                fixture = %self.fixture_name,
                test = %test_name,
                policy = %self.options.database,
                first_in_fixture = self.state.is_first_test(),
                "Starting test"
            )
        });
        Ok(())
    }

    /// Resolve the services the harness needs from the system under test,
    /// then set up the test database
    pub async fn configure(
        &mut self,
        services: &dyn ServiceContext,
    ) -> Result<Option<DatabaseHandle>> {
        let runtime_state = services.runtime_state()?;
        let database_factory = services.database_factory()?;
        let host_logger = services.logger_factory()?;
        self.logger
            .in_scope(|| debug!(host_logger = %host_logger.kind(), "Resolved host services"));

        self.setup_test_database(runtime_state.as_ref(), database_factory.as_ref()).await
    }

    /// Attach (or reuse) a database as the isolation policy dictates and
    /// point the system under test at it.
    ///
    /// With the `None` policy this returns straight away without touching
    /// the pool or registering any teardown.
    pub async fn setup_test_database(
        &mut self,
        runtime_state: &dyn RuntimeState,
        database_factory: &dyn DatabaseFactory,
    ) -> Result<Option<DatabaseHandle>> {
        if self.options.database == IsolationPolicy::None {
            return Ok(None);
        }

        let dispatch = self.logger.dispatch().clone();
        let span = self.logger.in_scope(|| fixture_span!("setup_test_database", self.fixture_name));

        self.setup_inner(runtime_state, database_factory)
            .instrument(span)
            .with_subscriber(dispatch)
            .await
    }

    async fn setup_inner(
        &mut self,
        runtime_state: &dyn RuntimeState,
        database_factory: &dyn DatabaseFactory,
    ) -> Result<Option<DatabaseHandle>> {
        let policy = self.options.database;
        let plan = resolve(policy, &self.state)?;
        if matches!(plan, DatabasePlan::Skip) {
            return Ok(None);
        }

        register_driver();
        let provider = self.provider().await?;

        let database = match plan {
            DatabasePlan::Skip => return Ok(None),
            DatabasePlan::AttachForTest(kind) => {
                let database = provider.attach(kind).await?;
                self.test_teardown.push(detach_action(&provider, &database));
                database
            }
            DatabasePlan::AttachForFixture(kind) => {
                let database = provider.attach(kind).await?;
                self.state.cache_database(Arc::clone(&database));
                self.fixture_teardown.push(detach_action(&provider, &database));
                database
            }
            DatabasePlan::ReuseFixture(database) => {
                debug!(database = %database.name(), "Reusing fixture database");
                database
            }
        };

        self.current_database = Some(Arc::clone(&database));

        database_factory
            .configure(database.connection_string(), database.provider_name())
            .await?;

        if let Some(expected) = policy.expected_level() {
            let actual = runtime_state.determine_runtime_level().await?;
            if actual != expected {
                return Err(HarnessError::RuntimeLevelMismatch {
                    database: database.name().to_string(),
                    expected,
                    actual,
                });
            }
        }

        info!(
            database = %database.name(),
            kind = %database.kind(),
            policy = %policy,
            "Test database configured"
        );
        Ok(Some(database))
    }

    async fn provider(&mut self) -> Result<Arc<dyn DatabaseProvider>> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }

        let provider: Arc<dyn DatabaseProvider> = shared_pool().await?;
        self.provider = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// Run the per-test teardown queue in registration order.
    ///
    /// Failures are reported, never raised: the caller decides whether they
    /// should affect the test's outcome.
    pub async fn after_test(&mut self) -> TeardownReport {
        let dispatch = self.logger.dispatch().clone();
        let span = self.logger.in_scope(|| fixture_span!("after_test", self.fixture_name));

        let report = self.test_teardown.drain().instrument(span).with_subscriber(dispatch).await;

        self.state.complete_test();
        self.current_database = None;

        let test = self.current_test.take().unwrap_or_default();
        self.logger.in_scope(|| {
            if report.is_clean() {
                debug!(test = %test, actions = report.executed.len(), "Test teardown complete");
            } else {
                warn!(test = %test, failures = report.failures.len(), "Test teardown had failures");
            }
        });
        report
    }

    /// Run the per-fixture teardown queue, releasing any fixture database
    pub async fn after_fixture(&mut self) -> TeardownReport {
        let dispatch = self.logger.dispatch().clone();
        let span = self.logger.in_scope(|| fixture_span!("after_fixture", self.fixture_name));

        let mut report = TeardownReport::default();
        if !self.test_teardown.is_empty() {
            // A test that skipped after_test still has its database attached
            let leftover = self
                .test_teardown
                .drain()
                .instrument(span.clone())
                .with_subscriber(dispatch.clone())
                .await;
            report.merge(leftover);
        }
        report.merge(
            self.fixture_teardown.drain().instrument(span).with_subscriber(dispatch).await,
        );

        self.state.take_database();
        self.current_database = None;

        self.logger.in_scope(|| {
            info!(
                fixture = %self.fixture_name,
                actions = report.executed.len(),
                failures = report.failures.len(),
                "Fixture teardown complete"
            )
        });
        report
    }
}

fn detach_action(
    provider: &Arc<dyn DatabaseProvider>,
    database: &DatabaseHandle,
) -> TeardownAction {
    let provider = Arc::clone(provider);
    let database = Arc::clone(database);
    TeardownAction::new(format!("detach {}", database.name()), move || async move {
        provider.detach(database).await
    })
}

impl Drop for TestLifecycleCoordinator {
    fn drop(&mut self) {
        let pending = self.test_teardown.len() + self.fixture_teardown.len();
        if pending > 0 {
            self.logger.in_scope(|| {
                warn!(
                    fixture = %self.fixture_name,
                    pending,
                    "Fixture dropped with teardown actions that never ran"
                )
            });
        }
    }
}
