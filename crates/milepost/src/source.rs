//! Migration source discovery
//!
//! A source is a named, ordered list of directories yielding one
//! totally ordered sequence of migration definitions. Files follow the
//! `<14-digit-version>_<snake_case_name>.sql` contract, with the body
//! split into `-- up` and `-- down` sections. Version ties across
//! directories within one source are rejected before any DDL runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use milepost_core::{to_identifier, MigrationVersion};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::error::{MigrationError, MigrationResult};
use crate::recorder;

/// Name of the source used when none is given.
pub const DEFAULT_SOURCE: &str = "default";

/// One versioned, named unit of reversible schema change.
///
/// Immutable once loaded; definitions are re-discovered from disk on
/// every migrator invocation and never persisted.
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    pub version: MigrationVersion,
    pub name: String,
    /// Statements applying the change, in order.
    pub up: Vec<String>,
    /// Statements reverting the change, in order.
    pub down: Vec<String>,
    pub path: PathBuf,
}

/// A named collection of migration directories with an independent
/// version history.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    name: String,
    paths: Vec<PathBuf>,
}

impl MigrationSource {
    pub fn new(name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            paths,
        }
    }

    /// The default source over a single directory.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::new(DEFAULT_SOURCE, vec![path.into()])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Directory new migrations are generated into (first path wins).
    pub fn primary_path(&self) -> Option<&Path> {
        self.paths.first().map(PathBuf::as_path)
    }

    /// Tracking table for this source's history. Each source gets its
    /// own table, so histories stay independent.
    pub fn tracking_table(&self) -> String {
        if self.name == DEFAULT_SOURCE {
            recorder::DEFAULT_TABLE.to_string()
        } else {
            format!("{}_{}", recorder::DEFAULT_TABLE, self.name)
        }
    }

    /// Well-known schema snapshot path: `schema.sql` next to the first
    /// migration directory.
    pub fn schema_path(&self) -> PathBuf {
        self.paths
            .first()
            .and_then(|path| path.parent())
            .map(|parent| parent.join("schema.sql"))
            .unwrap_or_else(|| PathBuf::from("schema.sql"))
    }

    /// Discover and parse all definitions, sorted ascending by
    /// version. A missing directory contributes nothing; a version
    /// defined twice is an error.
    pub fn load(&self) -> MigrationResult<Vec<MigrationDefinition>> {
        let mut definitions: BTreeMap<MigrationVersion, MigrationDefinition> = BTreeMap::new();

        for dir in &self.paths {
            if !dir.exists() {
                debug!(path = %dir.display(), "migration directory missing, skipping");
                continue;
            }

            let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            paths.sort();

            for path in paths {
                if path.extension().map_or(true, |ext| ext != "sql") {
                    continue;
                }
                let Some((version, name)) = parse_file_name(&path)? else {
                    warn!(path = %path.display(), "ignoring non-migration file");
                    continue;
                };
                let definition = parse_file(&path, version, name)?;

                if let Some(existing) = definitions.get(&version) {
                    return Err(MigrationError::DuplicateVersion {
                        version,
                        detail: format!(
                            "defined by {} and {}",
                            existing.path.display(),
                            path.display()
                        ),
                    });
                }
                definitions.insert(version, definition);
            }
        }

        Ok(definitions.into_values().collect())
    }
}

/// Apply the filename contract. Returns `Ok(None)` for files that do
/// not look like migration artifacts at all; files that start with a
/// digit run but violate the contract are malformed.
fn parse_file_name(path: &Path) -> MigrationResult<Option<(MigrationVersion, String)>> {
    let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
        return Ok(None);
    };

    let digits: String = stem.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Ok(None);
    }

    let rest = &stem[digits.len()..];
    if digits.len() != MigrationVersion::WIDTH || !rest.starts_with('_') || rest.len() < 2 {
        return Err(MigrationError::MalformedMigrationFile {
            path: path.display().to_string(),
        });
    }

    let version = digits
        .parse::<MigrationVersion>()
        .map_err(|_| MigrationError::MalformedMigrationFile {
            path: path.display().to_string(),
        })?;
    Ok(Some((version, to_identifier(&rest[1..]))))
}

fn parse_file(
    path: &Path,
    version: MigrationVersion,
    name: String,
) -> MigrationResult<MigrationDefinition> {
    let content = fs::read_to_string(path)?;
    let (up_sql, down_sql) = parse_body(&content);
    Ok(MigrationDefinition {
        version,
        name,
        up: split_statements(&up_sql),
        down: split_statements(&down_sql),
        path: path.to_path_buf(),
    })
}

/// Split a migration body into its up and down sections. Comment lines
/// outside the section markers are dropped.
fn parse_body(content: &str) -> (String, String) {
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let mut section = Section::Preamble;
    let mut up = Vec::new();
    let mut down = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim().to_lowercase();
        if trimmed.starts_with("-- up") {
            section = Section::Up;
            continue;
        }
        if trimmed.starts_with("-- down") {
            section = Section::Down;
            continue;
        }
        if line.trim().is_empty() || line.trim().starts_with("--") {
            continue;
        }
        match section {
            Section::Up => up.push(line),
            Section::Down => down.push(line),
            Section::Preamble => {}
        }
    }

    (up.join("\n"), down.join("\n"))
}

/// Split a section into individual statements, preferring a real SQL
/// parse and falling back to naive semicolon splitting.
fn split_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(parsed) => parsed.iter().map(|stmt| format!("{stmt};")).collect(),
        Err(error) => {
            warn!(%error, "SQL parsing failed, using naive semicolon splitting");
            sql.split(';')
                .map(str::trim)
                .filter(|fragment| !fragment.is_empty())
                .map(|fragment| format!("{fragment};"))
                .collect()
        }
    }
}
