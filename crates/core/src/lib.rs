//! # milepost-core: shared types for the milepost migration engine
//!
//! Leaf types consumed by the engine crate and by any outer tooling:
//! the `MigrationVersion` ordering key, the migration name transforms,
//! and the statically-typed database connection configuration with its
//! pure merge function.

pub mod config;
pub mod environment;
pub mod naming;
pub mod version;

pub use config::{merge, ConfigurationError, DatabaseConfig, ResolvedConfig};
pub use environment::Environment;
pub use naming::{to_class_name, to_identifier};
pub use version::{MigrationVersion, ParseVersionError};
