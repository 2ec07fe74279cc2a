//! # milepost: a standalone schema migration engine
//!
//! Tracks, orders, applies, and reverts versioned database schema
//! changes outside of any application framework. Migrations are plain
//! SQL files discovered from one or more directories; each source of
//! migrations keeps its own version-tracking table and schema
//! snapshot, so independent histories can share a database server.
//!
//! The engine is deliberately small: it is not a query builder and not
//! an ORM. It models migration metadata and DDL execution sequencing,
//! and delegates everything dialect-specific to a pluggable
//! [`driver::DatabaseDriver`].

pub mod driver;
pub mod error;
pub mod generator;
pub mod migrator;
pub mod recorder;
pub mod snapshot;
pub mod source;
pub mod tasks;

// Re-export core traits and types
pub use driver::{driver_for, DatabaseDriver, DriverTransaction, MemoryDriver, PostgresDriver, SqlDialect};
pub use error::{DriverError, DriverResult, MigrationError, MigrationResult};
pub use generator::create_migration;
pub use migrator::{MigrateReport, MigrationStatus, Migrator, MigratorState};
pub use recorder::RecordStore;
pub use snapshot::{SchemaDocument, SchemaSnapshotter};
pub use source::{MigrationDefinition, MigrationSource, DEFAULT_SOURCE};
pub use tasks::{Task, TaskOutcome};

pub use milepost_core::{
    merge, to_class_name, to_identifier, ConfigurationError, DatabaseConfig, Environment,
    MigrationVersion, ParseVersionError, ResolvedConfig,
};
