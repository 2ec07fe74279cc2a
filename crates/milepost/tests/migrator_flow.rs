//! End-to-end migrator behavior against the in-memory driver:
//! ordering, idempotence, partial-failure durability, targeted
//! up/down, the pending gate, and schema snapshot round-trips.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use milepost::{
    Environment, MemoryDriver, MigrateReport, MigrationError, MigrationSource, MigrationVersion,
    Migrator, MigratorState, SchemaSnapshotter, Task, TaskOutcome,
};
use tempfile::TempDir;

fn version(raw: &str) -> MigrationVersion {
    raw.parse().unwrap()
}

fn write_migration(dir: &Path, file_name: &str, table: &str) {
    let body = format!(
        "-- up\nCREATE TABLE {table} (id INTEGER);\n\n-- down\nDROP TABLE {table};\n"
    );
    fs::write(dir.join(file_name), body).unwrap();
}

/// The two-migration fixture from the version-ordering scenarios.
fn fixture(dir: &Path) {
    write_migration(dir, "20100509095815_create_tests.sql", "tests");
    write_migration(dir, "20100509095816_create_tests2.sql", "tests2");
}

fn migrator(dir: &Path) -> (Migrator, MemoryDriver) {
    let driver = MemoryDriver::new();
    let migrator = Migrator::new(
        MigrationSource::single(dir),
        Arc::new(driver.clone()),
    );
    (migrator, driver)
}

#[tokio::test]
async fn migrate_applies_everything_in_ascending_order() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(
        report.applied,
        vec![version("20100509095815"), version("20100509095816")]
    );
    assert_eq!(report.current_version, version("20100509095816"));
    assert_eq!(migrator.state(), MigratorState::Complete);
    assert_eq!(
        driver.executed(),
        vec![
            "CREATE TABLE tests (id INTEGER)".to_string(),
            "CREATE TABLE tests2 (id INTEGER)".to_string(),
        ]
    );
}

#[tokio::test]
async fn migrate_twice_performs_ddl_only_once() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let ddl_after_first = driver.executed();

    let report = migrator.migrate(None).await.unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.current_version, version("20100509095816"));
    assert_eq!(driver.executed(), ddl_after_first);
}

#[tokio::test]
async fn current_version_is_the_maximum_defined_version_after_migrate() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    assert_eq!(
        migrator.current_version().await.unwrap(),
        version("20100509095816")
    );
}

#[tokio::test]
async fn rollback_reverts_only_the_most_recent_migration() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let report = migrator.rollback(1).await.unwrap();

    assert_eq!(report.reverted, vec![version("20100509095816")]);
    assert_eq!(report.current_version, version("20100509095815"));
    assert!(driver.executed().contains(&"DROP TABLE tests2".to_string()));
    assert!(!driver.executed().contains(&"DROP TABLE tests".to_string()));
}

#[tokio::test]
async fn rollback_two_steps_reverts_everything() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let report = migrator.rollback(2).await.unwrap();

    assert_eq!(
        report.reverted,
        vec![version("20100509095816"), version("20100509095815")]
    );
    assert!(report.current_version.is_zero());
}

#[tokio::test]
async fn rollback_then_migrate_restores_the_previous_version() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let before = migrator.current_version().await.unwrap();

    migrator.rollback(1).await.unwrap();
    let report = migrator.migrate(None).await.unwrap();

    // Exactly the reverted unit's up runs again.
    assert_eq!(report.applied, vec![version("20100509095816")]);
    assert_eq!(report.current_version, before);
    let creates = driver
        .executed()
        .iter()
        .filter(|sql| sql.contains("CREATE TABLE tests2"))
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn run_down_leaves_later_applied_versions_untouched() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let report = migrator.run_down(version("20100509095815")).await.unwrap();

    assert_eq!(report.reverted, vec![version("20100509095815")]);
    assert_eq!(report.current_version, version("20100509095816"));
    assert!(driver.executed().contains(&"DROP TABLE tests".to_string()));
    assert!(!driver.executed().contains(&"DROP TABLE tests2".to_string()));
}

#[tokio::test]
async fn run_up_applies_a_single_out_of_order_version() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());

    let report = migrator.run_up(version("20100509095816")).await.unwrap();
    assert_eq!(report.applied, vec![version("20100509095816")]);
    assert_eq!(report.current_version, version("20100509095816"));
    assert_eq!(driver.executed(), vec!["CREATE TABLE tests2 (id INTEGER)".to_string()]);

    // 20100509095815 is still pending.
    assert_eq!(
        migrator.pending().await.unwrap(),
        vec![version("20100509095815")]
    );
}

#[tokio::test]
async fn run_up_rejects_an_unknown_version() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    let error = migrator.run_up(version("20240101000000")).await.unwrap_err();
    assert!(matches!(error, MigrationError::VersionNotFound { .. }));
    assert_eq!(migrator.state(), MigratorState::Failed);
}

#[tokio::test]
async fn abort_if_pending_lists_exactly_the_pending_versions() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    migrator.run_up(version("20100509095815")).await.unwrap();

    match migrator.abort_if_pending().await.unwrap_err() {
        MigrationError::PendingMigrations { versions } => {
            assert_eq!(versions, vec![version("20100509095816")]);
        }
        other => panic!("unexpected error: {other}"),
    }

    migrator.migrate(None).await.unwrap();
    migrator.abort_if_pending().await.unwrap();
}

#[tokio::test]
async fn duplicate_versions_abort_before_any_ddl() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write_migration(first.path(), "20100509095815_create_tests.sql", "tests");
    write_migration(second.path(), "20100509095815_create_copies.sql", "copies");

    let driver = MemoryDriver::new();
    let source = MigrationSource::new(
        "default",
        vec![first.path().to_path_buf(), second.path().to_path_buf()],
    );
    let mut migrator = Migrator::new(source, Arc::new(driver.clone()));

    let error = migrator.migrate(None).await.unwrap_err();
    assert!(matches!(error, MigrationError::DuplicateVersion { .. }));
    assert_eq!(migrator.state(), MigratorState::Failed);
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn failure_keeps_completed_units_and_skips_the_rest() {
    let dir = TempDir::new().unwrap();
    write_migration(dir.path(), "20100509095815_create_tests.sql", "tests");
    write_migration(dir.path(), "20100509095816_create_boom.sql", "boom_table");
    write_migration(dir.path(), "20100509095817_create_tests3.sql", "tests3");

    let (mut migrator, driver) = migrator(dir.path());
    driver.fail_on("boom_table");

    let error = migrator.migrate(None).await.unwrap_err();
    match &error {
        MigrationError::Execution {
            version: failed,
            name,
            remaining,
            ..
        } => {
            assert_eq!(*failed, version("20100509095816"));
            assert_eq!(name, "create_boom");
            assert_eq!(*remaining, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(migrator.state(), MigratorState::Failed);

    // The first unit is durable, the failing unit never recorded.
    assert_eq!(
        migrator.current_version().await.unwrap(),
        version("20100509095815")
    );
    assert_eq!(
        migrator.pending().await.unwrap(),
        vec![version("20100509095816"), version("20100509095817")]
    );

    // Re-invoking migrate after the cause is fixed resumes cleanly.
    driver.clear_failure();
    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(
        report.applied,
        vec![version("20100509095816"), version("20100509095817")]
    );
    assert_eq!(report.current_version, version("20100509095817"));
}

#[tokio::test]
async fn migrate_to_a_target_stops_at_that_version() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    let report = migrator
        .migrate(Some(version("20100509095815")))
        .await
        .unwrap();
    assert_eq!(report.applied, vec![version("20100509095815")]);
    assert_eq!(report.current_version, version("20100509095815"));
}

#[tokio::test]
async fn migrate_to_a_lower_target_reverts_down_to_it() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    migrator.migrate(None).await.unwrap();
    let report = migrator
        .migrate(Some(version("20100509095815")))
        .await
        .unwrap();

    assert_eq!(report.reverted, vec![version("20100509095816")]);
    assert_eq!(report.current_version, version("20100509095815"));
}

#[tokio::test]
async fn status_reports_applied_flags_and_orphans() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, driver) = migrator(dir.path());
    migrator.migrate(None).await.unwrap();

    // Simulate an applied migration whose file was deleted.
    migrator
        .store()
        .record_applied(&driver, version("20090101000000"))
        .await
        .unwrap();

    let status = migrator.status().await.unwrap();
    assert_eq!(status.len(), 3);
    assert_eq!(status[0].version, version("20090101000000"));
    assert_eq!(status[0].name, None);
    assert!(status[0].applied);
    assert_eq!(status[1].name.as_deref(), Some("create_tests"));
    assert!(status[1].applied);
}

#[tokio::test]
async fn snapshot_is_refreshed_after_each_mutating_run() {
    let dir = TempDir::new().unwrap();
    let schema_dir = TempDir::new().unwrap();
    let schema_path = schema_dir.path().join("schema.sql");
    fixture(dir.path());

    let driver = MemoryDriver::new();
    let mut migrator = Migrator::new(
        MigrationSource::single(dir.path()),
        Arc::new(driver.clone()),
    )
    .with_snapshotter(SchemaSnapshotter::new(&schema_path));

    migrator.migrate(None).await.unwrap();
    let text = fs::read_to_string(&schema_path).unwrap();
    assert!(text.contains("-- version: 20100509095815"));
    assert!(text.contains("-- version: 20100509095816"));
    assert!(text.contains("CREATE TABLE tests2 (id INTEGER);"));

    migrator.rollback(1).await.unwrap();
    let text = fs::read_to_string(&schema_path).unwrap();
    assert!(text.contains("-- version: 20100509095815"));
    assert!(!text.contains("-- version: 20100509095816"));
}

#[tokio::test]
async fn schema_load_reproduces_the_current_version_on_an_empty_database() {
    let dir = TempDir::new().unwrap();
    let schema_dir = TempDir::new().unwrap();
    let schema_path = schema_dir.path().join("schema.sql");
    fixture(dir.path());

    // Dump from a migrated database.
    let source_driver = MemoryDriver::new();
    let mut source_migrator = Migrator::new(
        MigrationSource::single(dir.path()),
        Arc::new(source_driver.clone()),
    )
    .with_snapshotter(SchemaSnapshotter::new(&schema_path));
    source_migrator.migrate(None).await.unwrap();

    // Load into a fresh database, bypassing migration replay.
    let fresh_driver = MemoryDriver::new();
    let fresh_migrator = Migrator::new(
        MigrationSource::single(dir.path()),
        Arc::new(fresh_driver.clone()),
    )
    .with_snapshotter(SchemaSnapshotter::new(&schema_path));

    let loaded_version = fresh_migrator.load_schema().await.unwrap();
    assert_eq!(loaded_version, version("20100509095816"));
    assert_eq!(
        fresh_migrator.current_version().await.unwrap(),
        source_migrator.current_version().await.unwrap()
    );
    assert_eq!(
        fresh_driver.executed(),
        vec![
            "CREATE TABLE tests (id INTEGER)".to_string(),
            "CREATE TABLE tests2 (id INTEGER)".to_string(),
        ]
    );
    assert!(fresh_migrator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn schema_load_refuses_protected_environments() {
    let dir = TempDir::new().unwrap();
    let schema_dir = TempDir::new().unwrap();
    fixture(dir.path());

    let migrator = Migrator::new(
        MigrationSource::single(dir.path()),
        Arc::new(MemoryDriver::new()),
    )
    .with_snapshotter(SchemaSnapshotter::new(schema_dir.path().join("schema.sql")))
    .with_environment(Environment::production());

    let error = migrator.load_schema().await.unwrap_err();
    assert!(matches!(
        error,
        MigrationError::ProtectedEnvironment { environment } if environment == "production"
    ));
}

#[tokio::test]
async fn tasks_dispatch_to_the_corresponding_operations() {
    let dir = TempDir::new().unwrap();
    fixture(dir.path());
    let (mut migrator, _driver) = migrator(dir.path());

    let outcome = Task::Migrate { to: None }.run(&mut migrator).await.unwrap();
    match outcome {
        TaskOutcome::Report(MigrateReport { applied, .. }) => assert_eq!(applied.len(), 2),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let outcome = Task::Version.run(&mut migrator).await.unwrap();
    assert_eq!(
        outcome,
        TaskOutcome::CurrentVersion(version("20100509095816"))
    );

    let outcome = Task::AbortIfPending.run(&mut migrator).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Clean);

    let outcome = Task::Rollback { steps: 2 }.run(&mut migrator).await.unwrap();
    match outcome {
        TaskOutcome::Report(report) => {
            assert_eq!(report.reverted.len(), 2);
            assert!(report.current_version.is_zero());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn independent_sources_keep_independent_histories() {
    let app_dir = TempDir::new().unwrap();
    let analytics_dir = TempDir::new().unwrap();
    write_migration(app_dir.path(), "20100509095815_create_tests.sql", "tests");
    write_migration(
        analytics_dir.path(),
        "20100509095815_create_events.sql",
        "events",
    );

    let driver = MemoryDriver::new();
    let mut app = Migrator::new(
        MigrationSource::single(app_dir.path()),
        Arc::new(driver.clone()),
    );
    let mut analytics = Migrator::new(
        MigrationSource::new("analytics", vec![analytics_dir.path().to_path_buf()]),
        Arc::new(driver.clone()),
    );

    app.migrate(None).await.unwrap();
    assert!(analytics.pending().await.unwrap().len() == 1);

    analytics.migrate(None).await.unwrap();
    analytics.rollback(1).await.unwrap();

    // Rolling back analytics leaves the app history applied.
    assert_eq!(
        app.current_version().await.unwrap(),
        version("20100509095815")
    );
    assert!(analytics.current_version().await.unwrap().is_zero());
}
