//! Schema snapshots
//!
//! A snapshot is a portable, diff-friendly textual capture of the
//! current database structure plus the applied version markers.
//! Loading a snapshot into an empty database recreates an equivalent
//! structure that reports the same current version as the source
//! database, without replaying every migration.
//!
//! The document is not required to be byte-identical across dialects,
//! only self-consistent and round-trippable within one dialect.

use std::fs;
use std::path::{Path, PathBuf};

use milepost_core::MigrationVersion;
use tracing::warn;

use crate::driver::DatabaseDriver;
use crate::error::{MigrationError, MigrationResult};
use crate::recorder::RecordStore;
use crate::source::MigrationSource;

const HEADER: &str = "-- schema snapshot; regenerated after every migration run";
const VERSION_MARKER: &str = "-- version:";

/// Parsed schema document: applied version markers plus structural
/// statements, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    pub versions: Vec<MigrationVersion>,
    pub statements: Vec<String>,
}

impl SchemaDocument {
    /// Highest version embedded in the document, or zero.
    pub fn current_version(&self) -> MigrationVersion {
        self.versions
            .iter()
            .max()
            .copied()
            .unwrap_or(MigrationVersion::ZERO)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        for version in &self.versions {
            out.push_str(&format!("{VERSION_MARKER} {version}\n"));
        }
        for statement in &self.statements {
            out.push('\n');
            out.push_str(statement.trim_end());
            if !statement.trim_end().ends_with(';') {
                out.push(';');
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> MigrationResult<SchemaDocument> {
        let mut document = SchemaDocument::default();
        let mut buffer = String::new();
        let mut statement_open = false;

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim();

            if let Some(raw) = trimmed.strip_prefix(VERSION_MARKER) {
                if statement_open {
                    return Err(MigrationError::SchemaDocument {
                        line: line_number,
                        message: "version marker inside a statement".to_string(),
                    });
                }
                let version =
                    raw.trim()
                        .parse::<MigrationVersion>()
                        .map_err(|e| MigrationError::SchemaDocument {
                            line: line_number,
                            message: e.to_string(),
                        })?;
                document.versions.push(version);
                continue;
            }
            if trimmed.is_empty() || (trimmed.starts_with("--") && !statement_open) {
                continue;
            }

            buffer.push_str(line);
            statement_open = true;
            if trimmed.ends_with(';') {
                document.statements.push(std::mem::take(&mut buffer));
                statement_open = false;
            } else {
                buffer.push('\n');
            }
        }

        if statement_open {
            return Err(MigrationError::SchemaDocument {
                line: text.lines().count(),
                message: "unterminated statement at end of document".to_string(),
            });
        }
        Ok(document)
    }
}

/// Dumps and loads schema documents at a source's well-known path.
#[derive(Debug, Clone)]
pub struct SchemaSnapshotter {
    path: PathBuf,
}

impl SchemaSnapshotter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_source(source: &MigrationSource) -> Self {
        Self::new(source.schema_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture the current structure and applied versions.
    pub async fn dump(
        &self,
        driver: &dyn DatabaseDriver,
        store: &RecordStore,
    ) -> MigrationResult<SchemaDocument> {
        let versions = store.applied_versions(driver).await?;
        let statements = driver.schema_statements(store.table()).await?;
        Ok(SchemaDocument {
            versions,
            statements,
        })
    }

    pub fn write(&self, document: &SchemaDocument) -> MigrationResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, document.render())?;
        Ok(())
    }

    pub fn read(&self) -> MigrationResult<SchemaDocument> {
        SchemaDocument::parse(&fs::read_to_string(&self.path)?)
    }

    /// Execute the document's statements and record its versions, in
    /// one transaction when the backend allows it. Afterwards the
    /// database reports the document's current version.
    pub async fn load(
        &self,
        driver: &dyn DatabaseDriver,
        store: &RecordStore,
        document: &SchemaDocument,
    ) -> MigrationResult<()> {
        store.ensure_table(driver).await?;

        if driver.supports_ddl_transactions() {
            let mut txn = driver.begin().await.map_err(MigrationError::from)?;
            let result = async {
                for statement in &document.statements {
                    txn.execute(statement).await?;
                }
                for version in &document.versions {
                    store.record_applied_in(txn.as_mut(), *version).await?;
                }
                Ok::<_, MigrationError>(())
            }
            .await;
            match result {
                Ok(()) => txn.commit().await.map_err(MigrationError::from),
                Err(error) => {
                    if let Err(rollback_error) = txn.rollback().await {
                        warn!(error = %rollback_error, "rollback after failed schema load also failed");
                    }
                    Err(error)
                }
            }
        } else {
            for statement in &document.statements {
                driver.execute(statement).await?;
            }
            for version in &document.versions {
                store.record_applied(driver, *version).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(raw: &str) -> MigrationVersion {
        raw.parse().unwrap()
    }

    fn document() -> SchemaDocument {
        SchemaDocument {
            versions: vec![version("20100509095815"), version("20100509095816")],
            statements: vec![
                "CREATE TABLE tests (\n    id INTEGER\n);".to_string(),
                "CREATE INDEX tests_id ON tests (id);".to_string(),
            ],
        }
    }

    #[test]
    fn renders_version_markers_and_statements() {
        let text = document().render();
        assert!(text.starts_with(HEADER));
        assert!(text.contains("-- version: 20100509095815"));
        assert!(text.contains("-- version: 20100509095816"));
        assert!(text.contains("CREATE INDEX tests_id ON tests (id);"));
    }

    #[test]
    fn render_and_parse_round_trip() {
        let original = document();
        let parsed = SchemaDocument::parse(&original.render()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn terminates_unterminated_statements_on_render() {
        let document = SchemaDocument {
            versions: vec![],
            statements: vec!["CREATE TABLE tests (id INTEGER)".to_string()],
        };
        let parsed = SchemaDocument::parse(&document.render()).unwrap();
        assert_eq!(parsed.statements, vec!["CREATE TABLE tests (id INTEGER);"]);
    }

    #[test]
    fn current_version_is_the_maximum_marker() {
        assert_eq!(document().current_version(), version("20100509095816"));
        assert!(SchemaDocument::default().current_version().is_zero());
    }

    #[test]
    fn bad_version_marker_reports_the_line() {
        let text = format!("{HEADER}\n-- version: nonsense\n");
        match SchemaDocument::parse(&text).unwrap_err() {
            MigrationError::SchemaDocument { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_trailing_statement_is_rejected() {
        let text = format!("{HEADER}\nCREATE TABLE tests (\n    id INTEGER\n");
        assert!(matches!(
            SchemaDocument::parse(&text).unwrap_err(),
            MigrationError::SchemaDocument { .. }
        ));
    }

    #[tokio::test]
    async fn write_and_read_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let snapshotter = SchemaSnapshotter::new(dir.path().join("db/schema.sql"));
        snapshotter.write(&document()).unwrap();
        assert_eq!(snapshotter.read().unwrap(), document());
    }
}
