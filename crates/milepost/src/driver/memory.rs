//! In-memory driver
//!
//! A fake backend for dry runs and the test suite. It understands
//! exactly the SQL shapes the engine itself emits against the
//! version-tracking table and records every other statement in an
//! ordered log, which doubles as its "schema": `schema_statements`
//! replays the committed DDL verbatim.
//!
//! A failure marker can be armed to make the next matching statement
//! fail, which is how partial-failure semantics are exercised without
//! a live server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use milepost_core::ResolvedConfig;

use super::{DatabaseDriver, DriverTransaction, SqlDialect};
use crate::error::{DriverError, DriverResult};

#[derive(Debug, Default)]
struct MemoryState {
    /// Version-tracking tables, keyed by table name.
    version_tables: BTreeMap<String, BTreeSet<String>>,
    /// Committed non-tracking statements, in execution order.
    statements: Vec<String>,
    databases: BTreeSet<String>,
    fail_on: Option<String>,
}

impl MemoryState {
    fn check_failure(&self, sql: &str) -> DriverResult<()> {
        if let Some(marker) = &self.fail_on {
            if sql.contains(marker.as_str()) {
                return Err(DriverError::ExecutionFailed {
                    statement: sql.to_string(),
                    cause: format!("armed failure marker '{marker}' matched"),
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, sql: &str) -> DriverResult<u64> {
        self.check_failure(sql)?;
        let trimmed = sql.trim().trim_end_matches(';').trim();

        if let Some(rest) = trimmed.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            if rest.ends_with("(version VARCHAR(14) PRIMARY KEY)") {
                if let Some(table) = rest.split_whitespace().next() {
                    self.version_tables.entry(table.to_string()).or_default();
                    return Ok(0);
                }
            }
        }

        if let Some(rest) = trimmed.strip_prefix("INSERT INTO ") {
            if let Some(table) = rest.split_whitespace().next() {
                if self.version_tables.contains_key(table) {
                    if let Some(version) = quoted_value(rest) {
                        if let Some(versions) = self.version_tables.get_mut(table) {
                            let inserted = versions.insert(version);
                            return Ok(u64::from(inserted));
                        }
                    }
                }
            }
        }

        if let Some(rest) = trimmed.strip_prefix("DELETE FROM ") {
            if let Some(table) = rest.split_whitespace().next() {
                if self.version_tables.contains_key(table) {
                    if let Some(version) = quoted_value(rest) {
                        if let Some(versions) = self.version_tables.get_mut(table) {
                            let removed = versions.remove(&version);
                            return Ok(u64::from(removed));
                        }
                    }
                }
            }
        }

        self.statements.push(trimmed.to_string());
        Ok(0)
    }
}

/// Extract the first single-quoted value from a statement fragment.
fn quoted_value(fragment: &str) -> Option<String> {
    let start = fragment.find('\'')? + 1;
    let end = start + fragment[start..].find('\'')?;
    Some(fragment[start..end].to_string())
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a failure: any subsequent statement containing `marker`
    /// fails with `ExecutionFailed` instead of executing.
    pub fn fail_on(&self, marker: impl Into<String>) {
        self.state().fail_on = Some(marker.into());
    }

    /// Disarm a previously armed failure marker.
    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    /// Committed non-tracking statements, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Versions currently recorded in a tracking table.
    pub fn tracked_versions(&self, table: &str) -> Vec<String> {
        self.state()
            .version_tables
            .get(table)
            .map(|versions| versions.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    async fn execute(&self, sql: &str) -> DriverResult<u64> {
        self.state().apply(sql)
    }

    async fn query_strings(&self, sql: &str) -> DriverResult<Vec<String>> {
        let state = self.state();
        state.check_failure(sql)?;
        let trimmed = sql.trim().trim_end_matches(';');
        if let Some(rest) = trimmed.strip_prefix("SELECT version FROM ") {
            if let Some(table) = rest.split_whitespace().next() {
                // BTreeSet iteration is ascending; versions are fixed
                // width, so lexicographic equals numeric order.
                return Ok(state
                    .version_tables
                    .get(table)
                    .map(|versions| versions.iter().cloned().collect())
                    .unwrap_or_default());
            }
        }
        Err(DriverError::UnsupportedOperation {
            dialect: SqlDialect::Memory.to_string(),
            operation: format!("query: {trimmed}"),
        })
    }

    async fn begin(&self) -> DriverResult<Box<dyn DriverTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            buffered: Vec::new(),
        }))
    }

    async fn create_database(&self, config: &ResolvedConfig) -> DriverResult<()> {
        self.state().databases.insert(config.database.clone());
        Ok(())
    }

    async fn drop_database(&self, config: &ResolvedConfig) -> DriverResult<()> {
        self.state().databases.remove(&config.database);
        Ok(())
    }

    async fn database_exists(&self, config: &ResolvedConfig) -> DriverResult<bool> {
        Ok(self.state().databases.contains(&config.database))
    }

    async fn schema_statements(&self, _tracking_table: &str) -> DriverResult<Vec<String>> {
        Ok(self.executed())
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Memory
    }

    fn supports_ddl_transactions(&self) -> bool {
        true
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    buffered: Vec<String>,
}

impl MemoryTransaction {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DriverTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> DriverResult<u64> {
        self.state().check_failure(sql)?;
        self.buffered.push(sql.to_string());
        Ok(0)
    }

    async fn commit(self: Box<Self>) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for sql in &self.buffered {
            state.apply(sql)?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        Ok(())
    }
}
