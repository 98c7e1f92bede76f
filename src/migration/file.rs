//! Migration files
//!
//! Two layouts are understood:
//!
//! - `{version}_{name}.json`: a serialized `Migration`, written by the generator
//! - `{version}_{name}.sql`: hand-authored SQL with a comment header
//!
//! ```sql
//! -- version: 20260301120000
//! -- name: add_orders
//! -- checksum: 9f2c...   (optional)
//! -- +up
//! CREATE TABLE orders (id BIGINT PRIMARY KEY);
//! -- +down
//! DROP TABLE orders;
//! ```

use super::operation::Operation;
use super::Migration;
use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Sql,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Sql => "sql",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(FileFormat::Json),
            Some("sql") => Some(FileFormat::Sql),
            _ => None,
        }
    }
}

/// Migration files in `dir`, sorted by file name
pub async fn list_migration_files(dir: &Path) -> EngineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if FileFormat::from_path(&path).is_some() && parse_file_stem(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `20260301120000_add_orders.sql` -> (20260301120000, "add_orders")
pub fn parse_file_stem(path: &Path) -> Option<(u64, String)> {
    let stem = path.file_stem()?.to_str()?;
    let (version, name) = stem.split_once('_')?;
    Some((version.parse().ok()?, name.to_string()))
}

/// Read and integrity-check a migration file
///
/// A JSON file whose content no longer matches its stored checksum, or a SQL
/// file whose header checksum disagrees with its body, is a
/// `ChecksumMismatch`.
pub async fn read_migration(path: &Path) -> EngineResult<Migration> {
    let format = FileFormat::from_path(path)
        .ok_or_else(|| EngineError::Validation(format!("not a migration file: {}", path.display())))?;
    let content = tokio::fs::read_to_string(path).await?;

    match format {
        FileFormat::Json => {
            let migration: Migration = serde_json::from_str(&content)?;
            migration.verify()?;
            Ok(migration)
        }
        FileFormat::Sql => parse_sql(path, &content),
    }
}

fn parse_sql(path: &Path, content: &str) -> EngineResult<Migration> {
    #[derive(PartialEq)]
    enum Section {
        Header,
        Up,
        Down,
    }

    let mut section = Section::Header;
    let mut version = None;
    let mut name = None;
    let mut checksum = None;
    let mut up = String::new();
    let mut down = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        match trimmed {
            "-- +up" => {
                section = Section::Up;
                continue;
            }
            "-- +down" => {
                section = Section::Down;
                continue;
            }
            _ => {}
        }

        match section {
            Section::Header => {
                if let Some((key, value)) = trimmed
                    .strip_prefix("--")
                    .and_then(|rest| rest.split_once(':'))
                {
                    let value = value.trim().to_string();
                    match key.trim() {
                        "version" => version = Some(value),
                        "name" => name = Some(value),
                        "checksum" => checksum = Some(value),
                        _ => {}
                    }
                }
            }
            Section::Up => {
                up.push_str(line);
                up.push('\n');
            }
            Section::Down => {
                down.push_str(line);
                down.push('\n');
            }
        }
    }

    let from_stem = parse_file_stem(path);
    let version = match version {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| EngineError::Validation(format!("invalid version header in {}", path.display())))?,
        None => from_stem
            .as_ref()
            .map(|(v, _)| *v)
            .ok_or_else(|| EngineError::Validation(format!("no version for {}", path.display())))?,
    };
    let name = name
        .or_else(|| from_stem.map(|(_, n)| n))
        .unwrap_or_else(|| "migration".to_string());

    let migration = Migration::new(version, name, statements(&up), statements(&down));

    if let Some(expected) = checksum {
        if expected != migration.checksum {
            return Err(EngineError::ChecksumMismatch {
                version,
                expected,
                actual: migration.checksum,
            });
        }
    }

    Ok(migration)
}

/// Split a SQL section into statements, one `RawSql` each
fn statements(section: &str) -> Vec<Operation> {
    section
        .split(';')
        .map(|s| {
            s.lines()
                .filter(|l| !l.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| Operation::RawSql { sql: format!("{};", s) })
        .collect()
}

/// SQL file content for a migration of raw statements
///
/// The checksum line is omitted for an empty template, since its body is
/// meant to be edited.
pub fn render_sql(migration: &Migration) -> String {
    let mut out = format!("-- version: {}\n-- name: {}\n", migration.version, migration.name);
    if !migration.up.is_empty() {
        out.push_str(&format!("-- checksum: {}\n", migration.checksum));
    }

    out.push_str("-- +up\n");
    for op in &migration.up {
        for statement in op.to_sql() {
            out.push_str(&statement);
            out.push('\n');
        }
    }
    out.push_str("\n-- +down\n");
    for op in &migration.down {
        for statement in op.to_sql() {
            out.push_str(&statement);
            out.push('\n');
        }
    }
    out
}

/// Write a migration to `dir`, refusing to overwrite an existing file
pub async fn write_migration(dir: &Path, migration: &Migration, format: FileFormat) -> EngineResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", migration.file_stem(), format.extension()));

    let content = match format {
        FileFormat::Json => serde_json::to_string_pretty(migration)?,
        FileFormat::Sql => render_sql(migration),
    };

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                EngineError::Conflict(format!("{} already exists", path.display()))
            }
            _ => e.into(),
        })?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;

    Ok(path)
}
