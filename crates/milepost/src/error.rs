//! Error types for the migration engine
//!
//! Two layers: [`DriverError`] for failures at the database boundary,
//! and [`MigrationError`] for everything the engine itself can reject.
//! Failure messages always name the offending version and migration,
//! never just "migration failed".

use milepost_core::{ConfigurationError, MigrationVersion, ParseVersionError};
use thiserror::Error;

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type alias for engine operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Failures at the database driver boundary.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to connect to the database: {0}")]
    ConnectionFailed(String),

    #[error("insufficient database privileges: {0}")]
    PermissionDenied(String),

    #[error("the {dialect} driver does not support {operation}")]
    UnsupportedOperation { dialect: String, operation: String },

    #[error("statement failed: {statement}: {cause}")]
    ExecutionFailed { statement: String, cause: String },
}

/// Failures surfaced by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Two definitions share one version, or a version is already
    /// recorded where a fresh record was expected. Raised at planning
    /// time, before any DDL executes.
    #[error("duplicate migration version {version}: {detail}")]
    DuplicateVersion {
        version: MigrationVersion,
        detail: String,
    },

    /// The file looks like a migration artifact but violates the
    /// `<14-digit-version>_<name>.sql` naming contract.
    #[error("malformed migration file: {path}")]
    MalformedMigrationFile { path: String },

    #[error("no migration with version {version} is defined in source '{source_name}'")]
    VersionNotFound {
        version: MigrationVersion,
        source_name: String,
    },

    #[error("migration {version} is not recorded as applied")]
    NotApplied { version: MigrationVersion },

    #[error("a migration named '{name}' already exists in this source")]
    MigrationExists { name: String },

    #[error("migration name '{name}' contains no usable identifier characters")]
    InvalidName { name: String },

    /// A unit's up or down failed. Completed units stay committed; the
    /// failing unit is never recorded.
    #[error(
        "migration {version} ({name}) failed, {remaining} pending migration(s) not attempted: {source}"
    )]
    Execution {
        version: MigrationVersion,
        name: String,
        remaining: usize,
        #[source]
        source: DriverError,
    },

    /// Raised by `abort_if_pending` as a CI/deploy gate.
    #[error("{} pending migration(s): {}", .versions.len(), format_versions(.versions))]
    PendingMigrations { versions: Vec<MigrationVersion> },

    #[error("invalid schema document at line {line}: {message}")]
    SchemaDocument { line: usize, message: String },

    #[error("no schema snapshot path configured for source '{source_name}'")]
    NoSnapshotter { source_name: String },

    /// Destructive operations refuse to run against protected
    /// environments unless the caller opts in explicitly.
    #[error("refusing to overwrite schema in protected environment '{environment}'")]
    ProtectedEnvironment { environment: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Version(#[from] ParseVersionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_versions(versions: &[MigrationVersion]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_name_the_version_and_migration() {
        let error = MigrationError::Execution {
            version: "20100509095815".parse().unwrap(),
            name: "create_tests".to_string(),
            remaining: 2,
            source: DriverError::ExecutionFailed {
                statement: "CREATE TABLE tests".to_string(),
                cause: "relation exists".to_string(),
            },
        };
        let message = error.to_string();
        assert!(message.contains("20100509095815"));
        assert!(message.contains("create_tests"));
        assert!(message.contains("2 pending"));
    }

    #[test]
    fn pending_errors_list_every_version() {
        let error = MigrationError::PendingMigrations {
            versions: vec![
                "20100509095815".parse().unwrap(),
                "20100509095816".parse().unwrap(),
            ],
        };
        let message = error.to_string();
        assert!(message.starts_with("2 pending"));
        assert!(message.contains("20100509095815, 20100509095816"));
    }
}
