//! Migration record store
//!
//! Durable bookkeeping of which versions have been applied, one
//! tracking table per source. The store builds portable SQL and
//! executes it through the driver; writes that must share a unit's
//! transaction go through the `*_in` variants.
//!
//! The table is created lazily on first use, so a fresh database needs
//! no setup step before its first migration run.

use milepost_core::MigrationVersion;
use tracing::debug;

use crate::driver::{DatabaseDriver, DriverTransaction};
use crate::error::{MigrationError, MigrationResult};

/// Default tracking table for the default source.
pub const DEFAULT_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone)]
pub struct RecordStore {
    table: String,
}

impl RecordStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (version VARCHAR(14) PRIMARY KEY)",
            self.table
        )
    }

    fn insert_sql(&self, version: MigrationVersion) -> String {
        format!(
            "INSERT INTO {} (version) VALUES ('{}')",
            self.table, version
        )
    }

    fn delete_sql(&self, version: MigrationVersion) -> String {
        format!("DELETE FROM {} WHERE version = '{}'", self.table, version)
    }

    fn select_sql(&self) -> String {
        format!("SELECT version FROM {} ORDER BY version ASC", self.table)
    }

    /// Create the tracking table if it does not exist yet.
    pub async fn ensure_table(&self, driver: &dyn DatabaseDriver) -> MigrationResult<()> {
        driver.execute(&self.create_table_sql()).await?;
        Ok(())
    }

    /// All recorded versions, ascending.
    pub async fn applied_versions(
        &self,
        driver: &dyn DatabaseDriver,
    ) -> MigrationResult<Vec<MigrationVersion>> {
        self.ensure_table(driver).await?;
        let mut versions = driver
            .query_strings(&self.select_sql())
            .await?
            .iter()
            .map(|raw| raw.parse::<MigrationVersion>())
            .collect::<Result<Vec<_>, _>>()?;
        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest recorded version, or the zero sentinel when empty.
    pub async fn current_version(
        &self,
        driver: &dyn DatabaseDriver,
    ) -> MigrationResult<MigrationVersion> {
        Ok(self
            .applied_versions(driver)
            .await?
            .last()
            .copied()
            .unwrap_or(MigrationVersion::ZERO))
    }

    /// Record a version as applied, outside any unit transaction.
    pub async fn record_applied(
        &self,
        driver: &dyn DatabaseDriver,
        version: MigrationVersion,
    ) -> MigrationResult<()> {
        if self.applied_versions(driver).await?.contains(&version) {
            return Err(MigrationError::DuplicateVersion {
                version,
                detail: format!("already recorded in {}", self.table),
            });
        }
        debug!(version = %version, table = %self.table, "recording applied version");
        driver.execute(&self.insert_sql(version)).await?;
        Ok(())
    }

    /// Remove the record for a version, outside any unit transaction.
    pub async fn record_reverted(
        &self,
        driver: &dyn DatabaseDriver,
        version: MigrationVersion,
    ) -> MigrationResult<()> {
        if !self.applied_versions(driver).await?.contains(&version) {
            return Err(MigrationError::NotApplied { version });
        }
        debug!(version = %version, table = %self.table, "removing applied version");
        driver.execute(&self.delete_sql(version)).await?;
        Ok(())
    }

    /// Record a version as applied inside a unit's transaction. The
    /// caller has already verified the version is unrecorded.
    pub async fn record_applied_in(
        &self,
        txn: &mut dyn DriverTransaction,
        version: MigrationVersion,
    ) -> MigrationResult<()> {
        txn.execute(&self.insert_sql(version)).await?;
        Ok(())
    }

    /// Remove a version's record inside a unit's transaction.
    pub async fn record_reverted_in(
        &self,
        txn: &mut dyn DriverTransaction,
        version: MigrationVersion,
    ) -> MigrationResult<()> {
        txn.execute(&self.delete_sql(version)).await?;
        Ok(())
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn version(raw: &str) -> MigrationVersion {
        raw.parse().unwrap()
    }

    #[test]
    fn builds_portable_tracking_sql() {
        let store = RecordStore::default();
        assert_eq!(
            store.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS schema_migrations (version VARCHAR(14) PRIMARY KEY)"
        );
        assert_eq!(
            store.insert_sql(version("20100509095815")),
            "INSERT INTO schema_migrations (version) VALUES ('20100509095815')"
        );
        assert_eq!(
            store.delete_sql(version("20100509095815")),
            "DELETE FROM schema_migrations WHERE version = '20100509095815'"
        );
        assert_eq!(
            store.select_sql(),
            "SELECT version FROM schema_migrations ORDER BY version ASC"
        );
    }

    #[tokio::test]
    async fn bootstraps_lazily_and_starts_empty() {
        let driver = MemoryDriver::new();
        let store = RecordStore::default();
        assert_eq!(store.applied_versions(&driver).await.unwrap(), vec![]);
        assert!(store.current_version(&driver).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn records_and_reverts_versions() {
        let driver = MemoryDriver::new();
        let store = RecordStore::default();

        store
            .record_applied(&driver, version("20100509095816"))
            .await
            .unwrap();
        store
            .record_applied(&driver, version("20100509095815"))
            .await
            .unwrap();

        assert_eq!(
            store.applied_versions(&driver).await.unwrap(),
            vec![version("20100509095815"), version("20100509095816")]
        );
        assert_eq!(
            store.current_version(&driver).await.unwrap(),
            version("20100509095816")
        );

        store
            .record_reverted(&driver, version("20100509095816"))
            .await
            .unwrap();
        assert_eq!(
            store.current_version(&driver).await.unwrap(),
            version("20100509095815")
        );
    }

    #[tokio::test]
    async fn double_recording_is_a_duplicate_version() {
        let driver = MemoryDriver::new();
        let store = RecordStore::default();
        store
            .record_applied(&driver, version("20100509095815"))
            .await
            .unwrap();
        let error = store
            .record_applied(&driver, version("20100509095815"))
            .await
            .unwrap_err();
        assert!(matches!(error, MigrationError::DuplicateVersion { .. }));
    }

    #[tokio::test]
    async fn reverting_an_unrecorded_version_fails() {
        let driver = MemoryDriver::new();
        let store = RecordStore::default();
        let error = store
            .record_reverted(&driver, version("20100509095815"))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            MigrationError::NotApplied { version } if version == self::version("20100509095815")
        ));
    }

    #[tokio::test]
    async fn stores_with_different_tables_are_independent() {
        let driver = MemoryDriver::new();
        let default_store = RecordStore::default();
        let named_store = RecordStore::new("schema_migrations_analytics");

        default_store
            .record_applied(&driver, version("20100509095815"))
            .await
            .unwrap();

        assert!(named_store.applied_versions(&driver).await.unwrap().is_empty());
        assert!(named_store.current_version(&driver).await.unwrap().is_zero());
    }
}
