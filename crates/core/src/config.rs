//! Database connection configuration
//!
//! The engine never discovers or parses configuration files; the outer
//! layer hands over a [`DatabaseConfig`] (every field optional) and the
//! pure [`merge`] function resolves it against explicit overrides and
//! documented defaults into a [`ResolvedConfig`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors surfaced before any DDL runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no database adapter configured")]
    MissingAdapter,

    #[error("no database name configured for adapter '{adapter}'")]
    MissingDatabase { adapter: String },
}

/// Partial connection settings, as deserialized from whatever format
/// the outer configuration layer uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Adapter name, e.g. `postgres` or `memory`.
    pub adapter: Option<String>,
    /// Server host. Defaults to `localhost`.
    pub host: Option<String>,
    /// Server port. Defaults to `5432`.
    pub port: Option<u16>,
    /// Database name. Required.
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DatabaseConfig {
    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn overlay(self, other: DatabaseConfig) -> DatabaseConfig {
        DatabaseConfig {
            adapter: other.adapter.or(self.adapter),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            database: other.database.or(self.database),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
        }
    }
}

/// Fully resolved connection settings consumed by the database driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub adapter: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ResolvedConfig {
    /// Connection URL for the configured database.
    pub fn url(&self) -> String {
        self.url_for(&self.database)
    }

    /// Connection URL for another database on the same server. Used by
    /// drivers that must reach a maintenance database to create or
    /// drop the target one.
    pub fn url_for(&self, database: &str) -> String {
        let scheme = match self.adapter.as_str() {
            "postgresql" => "postgres",
            other => other,
        };
        let credentials = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (Some(user), None) => format!("{user}@"),
            _ => String::new(),
        };
        format!(
            "{scheme}://{credentials}{}:{}/{database}",
            self.host, self.port
        )
    }
}

/// Resolve connection settings: explicit arguments win over the file
/// config, remaining gaps are filled with defaults.
pub fn merge(
    file: DatabaseConfig,
    explicit: DatabaseConfig,
) -> Result<ResolvedConfig, ConfigurationError> {
    let merged = file.overlay(explicit);
    let adapter = merged.adapter.ok_or(ConfigurationError::MissingAdapter)?;
    let database = merged
        .database
        .ok_or_else(|| ConfigurationError::MissingDatabase {
            adapter: adapter.clone(),
        })?;
    Ok(ResolvedConfig {
        host: merged.host.unwrap_or_else(|| "localhost".to_string()),
        port: merged.port.unwrap_or(5432),
        username: merged.username,
        password: merged.password,
        adapter,
        database,
    })
}
