//! Task dispatch
//!
//! An explicit mapping from command names to engine calls, for outer
//! layers (CLI, deploy scripts) that already parsed their arguments.
//! The dependency chain here is shallow and fixed, so this is plain
//! sequential dispatch; there is no task graph.

use std::path::PathBuf;

use milepost_core::MigrationVersion;

use crate::error::MigrationResult;
use crate::generator::create_migration;
use crate::migrator::{MigrateReport, Migrator};

/// One invokable engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Apply pending migrations, optionally up or down to a version.
    Migrate { to: Option<MigrationVersion> },
    /// Revert the last `steps` applied migrations.
    Rollback { steps: usize },
    /// Apply exactly one version.
    Up(MigrationVersion),
    /// Revert exactly one version.
    Down(MigrationVersion),
    /// Report the current version.
    Version,
    /// Fail when any defined migration is unapplied.
    AbortIfPending,
    /// Write the schema document.
    SchemaDump,
    /// Load the schema document.
    SchemaLoad,
    /// Generate a new migration file.
    NewMigration { name: String, fields: Vec<String> },
}

impl Task {
    /// Command name this task answers to.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Migrate { .. } => "migrate",
            Task::Rollback { .. } => "rollback",
            Task::Up(_) => "up",
            Task::Down(_) => "down",
            Task::Version => "version",
            Task::AbortIfPending => "abort-if-pending",
            Task::SchemaDump => "schema:dump",
            Task::SchemaLoad => "schema:load",
            Task::NewMigration { .. } => "new",
        }
    }

    /// Dispatch to the migrator. Any error maps to a non-zero exit in
    /// the outer layer; the error text names the offending version.
    pub async fn run(self, migrator: &mut Migrator) -> MigrationResult<TaskOutcome> {
        match self {
            Task::Migrate { to } => Ok(TaskOutcome::Report(migrator.migrate(to).await?)),
            Task::Rollback { steps } => Ok(TaskOutcome::Report(migrator.rollback(steps).await?)),
            Task::Up(version) => Ok(TaskOutcome::Report(migrator.run_up(version).await?)),
            Task::Down(version) => Ok(TaskOutcome::Report(migrator.run_down(version).await?)),
            Task::Version => Ok(TaskOutcome::CurrentVersion(
                migrator.current_version().await?,
            )),
            Task::AbortIfPending => {
                migrator.abort_if_pending().await?;
                Ok(TaskOutcome::Clean)
            }
            Task::SchemaDump => Ok(TaskOutcome::SchemaWritten(migrator.dump_schema().await?)),
            Task::SchemaLoad => Ok(TaskOutcome::CurrentVersion(migrator.load_schema().await?)),
            Task::NewMigration { name, fields } => Ok(TaskOutcome::Created(create_migration(
                migrator.source(),
                &name,
                &fields,
            )?)),
        }
    }
}

/// What a task produced, for the outer layer to display.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Report(MigrateReport),
    CurrentVersion(MigrationVersion),
    SchemaWritten(PathBuf),
    Created(PathBuf),
    Clean,
}
