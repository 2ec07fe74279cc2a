//! Migration file generation
//!
//! Creates new migration files from a human-provided name: the name is
//! normalized to a snake_case identifier, the version is the current
//! UTC second, and the file lands in the source's first directory. A
//! name that already exists in the source is refused, and a version
//! collision within one second steps to the next identifier.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use milepost_core::{to_class_name, to_identifier, MigrationVersion};
use tracing::info;

use crate::error::{MigrationError, MigrationResult};
use crate::source::MigrationSource;

/// Create a new migration file in `source` and return its path.
///
/// `fields` are column hints (`name:type`) carried into the template
/// as comments; the statement-level DSL is external to the engine.
pub fn create_migration(
    source: &MigrationSource,
    human_name: &str,
    fields: &[String],
) -> MigrationResult<PathBuf> {
    let name = to_identifier(human_name);
    if name.is_empty() {
        return Err(MigrationError::InvalidName {
            name: human_name.to_string(),
        });
    }

    let defined = source.load()?;
    if defined.iter().any(|d| d.name == name) {
        return Err(MigrationError::MigrationExists { name });
    }

    let mut version = MigrationVersion::generate(Utc::now());
    while defined.iter().any(|d| d.version == version) {
        version = version.next();
    }

    let dir = source
        .primary_path()
        .ok_or_else(|| MigrationError::InvalidName {
            name: format!("source '{}' has no migration directory", source.name()),
        })?;
    fs::create_dir_all(dir)?;

    let path = dir.join(format!("{version}_{name}.sql"));
    fs::write(&path, template(&name, version, fields))?;
    info!(path = %path.display(), "created migration");
    Ok(path)
}

fn template(name: &str, version: MigrationVersion, fields: &[String]) -> String {
    let mut out = format!(
        "-- migration: {} ({})\n-- version: {}\n\n-- up\n",
        to_class_name(name),
        name,
        version
    );
    for field in fields {
        out.push_str(&format!("-- column: {field}\n"));
    }
    out.push_str("\n\n-- down\n\n");
    out
}
