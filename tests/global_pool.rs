//! The process-wide pool fixtures fall back to when given no provider.

use std::path::PathBuf;
use std::sync::{Arc, Once};

use cms_testdb::config::LoggingConfig;
use cms_testdb::observability::init_global_logging;
use cms_testdb::provisioning::{shared_pool, shared_pool_if_started};
use cms_testdb::runtime::RuntimeState;
use cms_testdb::{
    FixtureOptions, IsolationPolicy, LoggerKind, PoolManager, RuntimeLevel, SqliteRuntime,
    TestLifecycleCoordinator,
};

static ENV: Once = Once::new();

/// Point the shared pool at a scratch directory before anyone creates it
fn init_env() {
    ENV.call_once(|| {
        // Builder threads log through the process-wide dispatcher
        assert!(init_global_logging(LoggerKind::Console, &LoggingConfig::default()));
        assert!(!init_global_logging(LoggerKind::Mock, &LoggingConfig::default()));

        let workdir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("global_pool");
        std::env::set_var("TESTDB_STORAGE__WORKING_DIRECTORY", &workdir);
        std::env::set_var("TESTDB_POOL__PREPARE_THREAD_COUNT", "2");
        std::env::set_var("TESTDB_POOL__EMPTY_DATABASES_COUNT", "1");
        std::env::set_var("TESTDB_POOL__SCHEMA_DATABASES_COUNT", "2");
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_builds_one_pool() {
    init_env();

    let tasks: Vec<_> = (0..8).map(|_| tokio::spawn(shared_pool())).collect();
    let mut pools: Vec<Arc<PoolManager>> = Vec::new();
    for task in tasks {
        pools.push(task.await.unwrap().unwrap());
    }

    assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
    assert!(Arc::ptr_eq(&shared_pool_if_started().unwrap(), &pools[0]));
    assert_eq!(pools[0].config().schema_databases_count, 2);
}

// Each test gets its own runtime; the shared pool must outlive them all
#[tokio::test]
async fn test_fixture_uses_shared_pool_by_default() {
    init_env();

    let mut fixture = TestLifecycleCoordinator::new(
        "SharedPoolFixture",
        FixtureOptions::new(IsolationPolicy::NewSchemaPerTest),
    );

    for test in ["one", "two"] {
        fixture.before_test(test).unwrap();
        let runtime = SqliteRuntime::default();
        let database = fixture.configure(&runtime).await.unwrap().unwrap();
        assert_eq!(runtime.level(), RuntimeLevel::Run);
        assert!(database.path().starts_with(
            PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("global_pool").join("LocalDb")
        ));
        assert!(fixture.after_test().await.is_clean());
    }

    assert!(fixture.after_fixture().await.is_clean());
}

#[tokio::test]
async fn test_second_runtime_still_gets_databases() {
    init_env();

    let mut fixture = TestLifecycleCoordinator::new(
        "AnotherSharedPoolFixture",
        FixtureOptions::new(IsolationPolicy::NewEmptyPerFixture),
    );

    fixture.before_test("only").unwrap();
    let runtime = SqliteRuntime::default();
    fixture.configure(&runtime).await.unwrap();
    assert_eq!(runtime.determine_runtime_level().await.unwrap(), RuntimeLevel::Install);
    assert!(fixture.after_test().await.is_clean());
    assert!(fixture.after_fixture().await.is_clean());
}
