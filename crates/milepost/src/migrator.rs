//! Migrator
//!
//! Orchestrates discovery, planning, and execution: computes the
//! pending or revertable set, runs each unit strictly in version
//! order, and records progress durably after every unit so a crash
//! mid-run leaves the record store consistent with exactly the units
//! that completed.
//!
//! One migrator owns one source and runs strictly sequentially.
//! Concurrent migrators targeting the same source and database require
//! external mutual exclusion (an advisory lock or equivalent); the
//! engine provides no internal locking.

use std::path::PathBuf;
use std::sync::Arc;

use milepost_core::{Environment, MigrationVersion};
use tracing::{debug, info, warn};

use crate::driver::DatabaseDriver;
use crate::error::{DriverError, MigrationError, MigrationResult};
use crate::recorder::RecordStore;
use crate::snapshot::SchemaSnapshotter;
use crate::source::{MigrationDefinition, MigrationSource};

/// Lifecycle of one migrator. `Failed` and `Complete` describe the
/// most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratorState {
    Idle,
    Planning,
    Applying,
    Reverting,
    Failed,
    Complete,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateReport {
    /// Versions applied by this run, in execution order.
    pub applied: Vec<MigrationVersion>,
    /// Versions reverted by this run, in execution order.
    pub reverted: Vec<MigrationVersion>,
    pub current_version: MigrationVersion,
}

/// One row of `status()`: a defined or orphaned version and whether it
/// is recorded as applied.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub version: MigrationVersion,
    /// `None` for applied versions whose files have been deleted.
    pub name: Option<String>,
    pub applied: bool,
}

pub struct Migrator {
    source: MigrationSource,
    store: RecordStore,
    driver: Arc<dyn DatabaseDriver>,
    snapshotter: Option<SchemaSnapshotter>,
    environment: Environment,
    state: MigratorState,
}

impl Migrator {
    pub fn new(source: MigrationSource, driver: Arc<dyn DatabaseDriver>) -> Self {
        let store = RecordStore::new(source.tracking_table());
        Self {
            source,
            store,
            driver,
            snapshotter: None,
            environment: Environment::default(),
            state: MigratorState::Idle,
        }
    }

    /// Attach a snapshotter; every successful mutating run then
    /// refreshes the schema document as a side effect.
    pub fn with_snapshotter(mut self, snapshotter: SchemaSnapshotter) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    /// Name the environment this migrator runs against. Protected
    /// environments refuse schema loads.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn state(&self) -> MigratorState {
        self.state
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Apply every pending migration in ascending version order, or
    /// move the database to `target`: pending versions up to and
    /// including the target when migrating up, applied versions above
    /// the target (in descending order) when the target lies below the
    /// current version.
    ///
    /// With nothing to do this is a no-op: zero DDL, nothing recorded.
    pub async fn migrate(
        &mut self,
        target: Option<MigrationVersion>,
    ) -> MigrationResult<MigrateReport> {
        self.state = MigratorState::Planning;
        match self.migrate_inner(target).await {
            Ok(report) => {
                self.state = MigratorState::Complete;
                Ok(report)
            }
            Err(error) => {
                self.state = MigratorState::Failed;
                Err(error)
            }
        }
    }

    async fn migrate_inner(
        &mut self,
        target: Option<MigrationVersion>,
    ) -> MigrationResult<MigrateReport> {
        let defined = self.source.load()?;
        let applied = self.store.applied_versions(self.driver.as_ref()).await?;
        let current = applied.last().copied().unwrap_or(MigrationVersion::ZERO);

        let mut report = MigrateReport::default();

        if let Some(target) = target.filter(|t| *t < current) {
            let plan: Vec<&MigrationDefinition> = defined
                .iter()
                .rev()
                .filter(|d| d.version > target && applied.contains(&d.version))
                .collect();
            self.state = MigratorState::Reverting;
            for (index, definition) in plan.iter().enumerate() {
                self.revert_unit(definition, plan.len() - index - 1).await?;
                report.reverted.push(definition.version);
            }
        } else {
            let plan: Vec<&MigrationDefinition> = defined
                .iter()
                .filter(|d| !applied.contains(&d.version))
                .filter(|d| target.map_or(true, |t| d.version <= t))
                .collect();
            if plan.is_empty() {
                debug!(source = self.source.name(), "nothing pending");
                report.current_version = current;
                return Ok(report);
            }
            self.state = MigratorState::Applying;
            for (index, definition) in plan.iter().enumerate() {
                self.apply_unit(definition, plan.len() - index - 1).await?;
                report.applied.push(definition.version);
            }
        }

        report.current_version = self.store.current_version(self.driver.as_ref()).await?;
        self.refresh_snapshot().await?;
        Ok(report)
    }

    /// Revert the last `steps` applied migrations, most recent first.
    /// `steps` is clamped to at least one.
    pub async fn rollback(&mut self, steps: usize) -> MigrationResult<MigrateReport> {
        self.state = MigratorState::Planning;
        match self.rollback_inner(steps.max(1)).await {
            Ok(report) => {
                self.state = MigratorState::Complete;
                Ok(report)
            }
            Err(error) => {
                self.state = MigratorState::Failed;
                Err(error)
            }
        }
    }

    async fn rollback_inner(&mut self, steps: usize) -> MigrationResult<MigrateReport> {
        let defined = self.source.load()?;
        let applied = self.store.applied_versions(self.driver.as_ref()).await?;

        let mut report = MigrateReport::default();
        let targets: Vec<MigrationVersion> = applied.iter().rev().take(steps).copied().collect();
        if targets.is_empty() {
            report.current_version = MigrationVersion::ZERO;
            return Ok(report);
        }

        self.state = MigratorState::Reverting;
        for (index, version) in targets.iter().enumerate() {
            let definition = defined
                .iter()
                .find(|d| d.version == *version)
                .ok_or(MigrationError::VersionNotFound {
                    version: *version,
                    source_name: self.source.name().to_string(),
                })?;
            self.revert_unit(definition, targets.len() - index - 1)
                .await?;
            report.reverted.push(*version);
        }

        report.current_version = self.store.current_version(self.driver.as_ref()).await?;
        self.refresh_snapshot().await?;
        Ok(report)
    }

    /// Apply exactly one version, regardless of its position relative
    /// to the current version. Escape hatch for out-of-order repairs.
    pub async fn run_up(&mut self, version: MigrationVersion) -> MigrationResult<MigrateReport> {
        self.state = MigratorState::Planning;
        match self.run_up_inner(version).await {
            Ok(report) => {
                self.state = MigratorState::Complete;
                Ok(report)
            }
            Err(error) => {
                self.state = MigratorState::Failed;
                Err(error)
            }
        }
    }

    async fn run_up_inner(&mut self, version: MigrationVersion) -> MigrationResult<MigrateReport> {
        let defined = self.source.load()?;
        let definition =
            defined
                .iter()
                .find(|d| d.version == version)
                .ok_or(MigrationError::VersionNotFound {
                    version,
                    source_name: self.source.name().to_string(),
                })?;

        let applied = self.store.applied_versions(self.driver.as_ref()).await?;
        if applied.contains(&version) {
            return Err(MigrationError::DuplicateVersion {
                version,
                detail: format!("already recorded in {}", self.store.table()),
            });
        }

        self.state = MigratorState::Applying;
        self.apply_unit(definition, 0).await?;

        let mut report = MigrateReport {
            applied: vec![version],
            ..MigrateReport::default()
        };
        report.current_version = self.store.current_version(self.driver.as_ref()).await?;
        self.refresh_snapshot().await?;
        Ok(report)
    }

    /// Revert exactly one version, regardless of its position. Later
    /// applied versions are left untouched.
    pub async fn run_down(&mut self, version: MigrationVersion) -> MigrationResult<MigrateReport> {
        self.state = MigratorState::Planning;
        match self.run_down_inner(version).await {
            Ok(report) => {
                self.state = MigratorState::Complete;
                Ok(report)
            }
            Err(error) => {
                self.state = MigratorState::Failed;
                Err(error)
            }
        }
    }

    async fn run_down_inner(
        &mut self,
        version: MigrationVersion,
    ) -> MigrationResult<MigrateReport> {
        let defined = self.source.load()?;
        let definition =
            defined
                .iter()
                .find(|d| d.version == version)
                .ok_or(MigrationError::VersionNotFound {
                    version,
                    source_name: self.source.name().to_string(),
                })?;

        let applied = self.store.applied_versions(self.driver.as_ref()).await?;
        if !applied.contains(&version) {
            return Err(MigrationError::NotApplied { version });
        }

        self.state = MigratorState::Reverting;
        self.revert_unit(definition, 0).await?;

        let mut report = MigrateReport {
            reverted: vec![version],
            ..MigrateReport::default()
        };
        report.current_version = self.store.current_version(self.driver.as_ref()).await?;
        self.refresh_snapshot().await?;
        Ok(report)
    }

    /// Defined-but-unapplied versions, ascending. Read-only.
    pub async fn pending(&self) -> MigrationResult<Vec<MigrationVersion>> {
        let defined = self.source.load()?;
        let applied = self.store.applied_versions(self.driver.as_ref()).await?;
        Ok(defined
            .iter()
            .map(|d| d.version)
            .filter(|version| !applied.contains(version))
            .collect())
    }

    /// Precondition gate: error listing every pending version when any
    /// exist, success with no side effects otherwise.
    pub async fn abort_if_pending(&self) -> MigrationResult<()> {
        let versions = self.pending().await?;
        if versions.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::PendingMigrations { versions })
        }
    }

    /// Highest applied version, or zero when nothing is applied.
    pub async fn current_version(&self) -> MigrationResult<MigrationVersion> {
        self.store.current_version(self.driver.as_ref()).await
    }

    /// Every known version with its applied flag: defined versions in
    /// order, then applied versions whose files have been deleted.
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatus>> {
        let defined = self.source.load()?;
        let applied = self.store.applied_versions(self.driver.as_ref()).await?;

        let mut rows: Vec<MigrationStatus> = defined
            .iter()
            .map(|d| MigrationStatus {
                version: d.version,
                name: Some(d.name.clone()),
                applied: applied.contains(&d.version),
            })
            .collect();
        for version in applied {
            if !defined.iter().any(|d| d.version == version) {
                rows.push(MigrationStatus {
                    version,
                    name: None,
                    applied: true,
                });
            }
        }
        rows.sort_by_key(|row| row.version);
        Ok(rows)
    }

    /// Write the current schema document to the source's well-known
    /// path. Errors when no snapshotter is attached.
    pub async fn dump_schema(&self) -> MigrationResult<PathBuf> {
        let snapshotter = self.require_snapshotter()?;
        let document = snapshotter
            .dump(self.driver.as_ref(), &self.store)
            .await?;
        snapshotter.write(&document)?;
        Ok(snapshotter.path().to_path_buf())
    }

    /// Load the schema document from the source's well-known path into
    /// the database, recreating structure and version records without
    /// replaying history.
    pub async fn load_schema(&self) -> MigrationResult<MigrationVersion> {
        if self.environment.is_protected() {
            return Err(MigrationError::ProtectedEnvironment {
                environment: self.environment.to_string(),
            });
        }
        let snapshotter = self.require_snapshotter()?;
        let document = snapshotter.read()?;
        snapshotter
            .load(self.driver.as_ref(), &self.store, &document)
            .await?;
        self.current_version().await
    }

    fn require_snapshotter(&self) -> MigrationResult<&SchemaSnapshotter> {
        self.snapshotter
            .as_ref()
            .ok_or_else(|| MigrationError::NoSnapshotter {
                source_name: self.source.name().to_string(),
            })
    }

    async fn refresh_snapshot(&self) -> MigrationResult<()> {
        if let Some(snapshotter) = &self.snapshotter {
            let document = snapshotter
                .dump(self.driver.as_ref(), &self.store)
                .await?;
            snapshotter.write(&document)?;
            debug!(path = %snapshotter.path().display(), "schema snapshot refreshed");
        }
        Ok(())
    }

    async fn apply_unit(
        &self,
        definition: &MigrationDefinition,
        remaining: usize,
    ) -> MigrationResult<()> {
        info!(
            version = %definition.version,
            name = %definition.name,
            "applying migration"
        );
        self.run_unit(definition, &definition.up, remaining, true)
            .await
    }

    async fn revert_unit(
        &self,
        definition: &MigrationDefinition,
        remaining: usize,
    ) -> MigrationResult<()> {
        info!(
            version = %definition.version,
            name = %definition.name,
            "reverting migration"
        );
        self.run_unit(definition, &definition.down, remaining, false)
            .await
    }

    /// Execute one unit and its tracking record. Wrapped in a single
    /// transaction when the backend supports transactional DDL, so a
    /// rolled-back change is never recorded as applied.
    async fn run_unit(
        &self,
        definition: &MigrationDefinition,
        statements: &[String],
        remaining: usize,
        applying: bool,
    ) -> MigrationResult<()> {
        if self.driver.supports_ddl_transactions() {
            let mut txn = self
                .driver
                .begin()
                .await
                .map_err(|e| self.execution_error(definition, remaining, e))?;

            let mut failure: Option<DriverError> = None;
            for statement in statements {
                debug!(statement = %statement, "executing");
                if let Err(error) = txn.execute(statement).await {
                    failure = Some(error);
                    break;
                }
            }

            match failure {
                Some(error) => {
                    if let Err(rollback_error) = txn.rollback().await {
                        warn!(error = %rollback_error, "rollback after failed unit also failed");
                    }
                    Err(self.execution_error(definition, remaining, error))
                }
                None => {
                    if applying {
                        self.store
                            .record_applied_in(txn.as_mut(), definition.version)
                            .await?;
                    } else {
                        self.store
                            .record_reverted_in(txn.as_mut(), definition.version)
                            .await?;
                    }
                    txn.commit()
                        .await
                        .map_err(|e| self.execution_error(definition, remaining, e))
                }
            }
        } else {
            for statement in statements {
                debug!(statement = %statement, "executing");
                self.driver
                    .execute(statement)
                    .await
                    .map_err(|e| self.execution_error(definition, remaining, e))?;
            }
            if applying {
                self.store
                    .record_applied(self.driver.as_ref(), definition.version)
                    .await
            } else {
                self.store
                    .record_reverted(self.driver.as_ref(), definition.version)
                    .await
            }
        }
    }

    fn execution_error(
        &self,
        definition: &MigrationDefinition,
        remaining: usize,
        cause: DriverError,
    ) -> MigrationError {
        MigrationError::Execution {
            version: definition.version,
            name: definition.name.clone(),
            remaining,
            source: cause,
        }
    }
}
