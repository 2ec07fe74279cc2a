//! PostgreSQL driver
//!
//! Backed by a sqlx connection pool. Database create/drop/exists go
//! through a short-lived connection to the `postgres` maintenance
//! database, since the target database may not exist yet.

use async_trait::async_trait;
use milepost_core::ResolvedConfig;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{DatabaseDriver, DriverTransaction, SqlDialect};
use crate::error::{DriverError, DriverResult};

// SQLSTATE for insufficient_privilege
const PERMISSION_DENIED: &str = "42501";

pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> DriverResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn maintenance_pool(config: &ResolvedConfig) -> DriverResult<PgPool> {
        PgPool::connect(&config.url_for("postgres"))
            .await
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn map_sqlx(statement: &str, error: sqlx::Error) -> DriverError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some(PERMISSION_DENIED) {
            return DriverError::PermissionDenied(db_error.message().to_string());
        }
    }
    DriverError::ExecutionFailed {
        statement: statement.to_string(),
        cause: error.to_string(),
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    async fn execute(&self, sql: &str) -> DriverResult<u64> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| map_sqlx(sql, e))
    }

    async fn query_strings(&self, sql: &str) -> DriverResult<Vec<String>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(sql, e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(|e| map_sqlx(sql, e)))
            .collect()
    }

    async fn begin(&self) -> DriverResult<Box<dyn DriverTransaction>> {
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("BEGIN", e))?;
        Ok(Box::new(PostgresTransaction { transaction }))
    }

    async fn create_database(&self, config: &ResolvedConfig) -> DriverResult<()> {
        let pool = Self::maintenance_pool(config).await?;
        let sql = format!("CREATE DATABASE {}", quote_ident(&config.database));
        let result = sqlx::query(&sql).execute(&pool).await;
        pool.close().await;
        result.map(|_| ()).map_err(|e| map_sqlx(&sql, e))
    }

    async fn drop_database(&self, config: &ResolvedConfig) -> DriverResult<()> {
        let pool = Self::maintenance_pool(config).await?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&config.database));
        let result = sqlx::query(&sql).execute(&pool).await;
        pool.close().await;
        result.map(|_| ()).map_err(|e| map_sqlx(&sql, e))
    }

    async fn database_exists(&self, config: &ResolvedConfig) -> DriverResult<bool> {
        let pool = Self::maintenance_pool(config).await?;
        let result = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(&config.database)
            .fetch_optional(&pool)
            .await;
        pool.close().await;
        result
            .map(|row| row.is_some())
            .map_err(|e| map_sqlx("SELECT 1 FROM pg_database", e))
    }

    async fn schema_statements(&self, tracking_table: &str) -> DriverResult<Vec<String>> {
        let mut statements = Vec::new();

        let tables_sql =
            "SELECT tablename FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename";
        let tables = self.query_strings(tables_sql).await?;

        for table in tables.iter().filter(|t| t.as_str() != tracking_table) {
            let columns_sql = "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position";
            let rows = sqlx::query(columns_sql)
                .bind(table)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx(columns_sql, e))?;

            let mut columns = Vec::new();
            for row in &rows {
                let name: String = row.try_get("column_name").map_err(|e| map_sqlx(columns_sql, e))?;
                let data_type: String = row.try_get("data_type").map_err(|e| map_sqlx(columns_sql, e))?;
                let nullable: String = row.try_get("is_nullable").map_err(|e| map_sqlx(columns_sql, e))?;
                let default: Option<String> =
                    row.try_get("column_default").map_err(|e| map_sqlx(columns_sql, e))?;

                let mut column = format!("    {} {}", quote_ident(&name), data_type);
                if let Some(default) = default {
                    column.push_str(&format!(" DEFAULT {default}"));
                }
                if nullable == "NO" {
                    column.push_str(" NOT NULL");
                }
                columns.push(column);
            }

            statements.push(format!(
                "CREATE TABLE {} (\n{}\n);",
                quote_ident(table),
                columns.join(",\n")
            ));
        }

        let indexes_sql = "SELECT indexdef FROM pg_indexes \
             WHERE schemaname = 'public' AND tablename <> $1 AND indexname NOT LIKE '%_pkey' \
             ORDER BY indexname";
        let rows = sqlx::query(indexes_sql)
            .bind(tracking_table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(indexes_sql, e))?;
        for row in &rows {
            let definition: String = row.try_get(0).map_err(|e| map_sqlx(indexes_sql, e))?;
            statements.push(format!("{definition};"));
        }

        Ok(statements)
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn supports_ddl_transactions(&self) -> bool {
        true
    }
}

struct PostgresTransaction {
    transaction: Transaction<'static, Postgres>,
}

#[async_trait]
impl DriverTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str) -> DriverResult<u64> {
        sqlx::query(sql)
            .execute(&mut *self.transaction)
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| map_sqlx(sql, e))
    }

    async fn commit(self: Box<Self>) -> DriverResult<()> {
        self.transaction
            .commit()
            .await
            .map_err(|e| map_sqlx("COMMIT", e))
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        self.transaction
            .rollback()
            .await
            .map_err(|e| map_sqlx("ROLLBACK", e))
    }
}
