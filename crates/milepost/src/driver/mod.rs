//! Database driver abstraction
//!
//! A thin capability interface over a SQL connection: execute DDL,
//! read the version-tracking table, wrap a unit of work in a
//! transaction, and manage whole databases. The engine talks only to
//! these traits; dialect differences live in one concrete driver per
//! adapter, selected once at startup by adapter name.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use milepost_core::ResolvedConfig;

use crate::error::{DriverError, DriverResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;

/// SQL dialect spoken by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Memory,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::Memory => "memory",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface over one database connection.
///
/// DDL executed through a driver is externally observable and not
/// reversible by the driver itself; reversal is the caller's
/// responsibility via a down-migration.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Execute a single DDL or DML statement outside any transaction.
    async fn execute(&self, sql: &str) -> DriverResult<u64>;

    /// Fetch a single text column, one value per row.
    async fn query_strings(&self, sql: &str) -> DriverResult<Vec<String>>;

    /// Begin a transaction wrapping one unit of work.
    async fn begin(&self) -> DriverResult<Box<dyn DriverTransaction>>;

    async fn create_database(&self, config: &ResolvedConfig) -> DriverResult<()>;

    async fn drop_database(&self, config: &ResolvedConfig) -> DriverResult<()>;

    async fn database_exists(&self, config: &ResolvedConfig) -> DriverResult<bool>;

    /// Structural DDL (tables, columns, indexes) sufficient to
    /// recreate the current schema, excluding the tracking table.
    async fn schema_statements(&self, tracking_table: &str) -> DriverResult<Vec<String>>;

    fn dialect(&self) -> SqlDialect;

    /// Whether DDL participates in transactions on this backend. When
    /// true the engine wraps each migration unit, together with its
    /// tracking record, in one transaction.
    fn supports_ddl_transactions(&self) -> bool;
}

/// A transaction handed out by [`DatabaseDriver::begin`].
#[async_trait]
pub trait DriverTransaction: Send {
    async fn execute(&mut self, sql: &str) -> DriverResult<u64>;

    async fn commit(self: Box<Self>) -> DriverResult<()>;

    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// Select and connect a driver by adapter name.
pub async fn driver_for(config: &ResolvedConfig) -> DriverResult<Arc<dyn DatabaseDriver>> {
    match config.adapter.as_str() {
        "postgres" | "postgresql" => Ok(Arc::new(PostgresDriver::connect(&config.url()).await?)),
        "memory" => Ok(Arc::new(MemoryDriver::new())),
        other => Err(DriverError::UnsupportedOperation {
            dialect: other.to_string(),
            operation: "connecting (unknown adapter)".to_string(),
        }),
    }
}
