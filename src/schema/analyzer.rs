//! Schema Analyzer
//!
//! Turns a data source into a canonical `SchemaModel`. Vendor type names are
//! normalized here; everything downstream only sees canonical tokens.

use super::model::{Column, Constraint, Index, SchemaModel, Table};
use super::postgres::PostgresIntrospector;
use super::types::CanonicalType;
use crate::config::SchemaConfig;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures::stream::{self, Stream, TryStreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a schema is read from
#[derive(Clone)]
pub enum SchemaSource {
    /// Live PostgreSQL database
    LiveConnection(Pool),
    /// JSON definition file (vendor type names) or a stored snapshot
    StaticDefinitionFile(PathBuf),
}

impl SchemaSource {
    pub fn describe(&self) -> String {
        match self {
            SchemaSource::LiveConnection(_) => "live connection".to_string(),
            SchemaSource::StaticDefinitionFile(path) => format!("definition file {}", path.display()),
        }
    }
}

/// Column as reported by a source, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub vendor_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub ordinal: Option<i32>,
}

fn default_nullable() -> bool {
    true
}

/// Table as reported by a source, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTable {
    pub name: String,
    pub columns: Vec<RawColumn>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// Static definition file layout; snapshot files parse as well
#[derive(Debug, Deserialize)]
struct StaticDefinition {
    tables: Vec<RawTable>,
}

/// A vendor type with no canonical counterpart (column defaulted to STRING)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedTypeWarning {
    pub table: String,
    pub column: String,
    pub vendor_type: String,
}

/// Result of one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub model: SchemaModel,
    pub warnings: Vec<UnsupportedTypeWarning>,
}

/// Anything that can produce a schema model
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn analyze(&self) -> EngineResult<Analysis>;
}

pub struct SchemaAnalyzer {
    source: SchemaSource,
    config: SchemaConfig,
    ledger_table: String,
}

impl SchemaAnalyzer {
    pub fn new(source: SchemaSource, config: SchemaConfig, ledger_table: impl Into<String>) -> Self {
        Self {
            source,
            config,
            ledger_table: ledger_table.into(),
        }
    }

    pub fn source(&self) -> &SchemaSource {
        &self.source
    }

    async fn analyze_live(&self, pool: &Pool) -> EngineResult<Analysis> {
        let client = self.connect(pool).await?;
        let introspector = PostgresIntrospector::new(&client, &self.config.schema);

        let names: Vec<String> = introspector
            .table_names()
            .await?
            .into_iter()
            .filter(|name| !self.is_excluded(name))
            .collect();
        debug!("Found {} tables in schema {}", names.len(), self.config.schema);

        self.collect(introspector.tables(names)).await
    }

    async fn analyze_file(&self, path: &Path) -> EngineResult<Analysis> {
        let content = tokio::fs::read_to_string(path).await?;
        let definition: StaticDefinition = serde_json::from_str(&content)?;

        self.collect(stream::iter(definition.tables.into_iter().map(Ok)))
            .await
    }

    /// Normalize tables as they arrive
    async fn collect<S>(&self, tables: S) -> EngineResult<Analysis>
    where
        S: Stream<Item = EngineResult<RawTable>>,
    {
        futures::pin_mut!(tables);

        let mut normalized = Vec::new();
        let mut warnings = Vec::new();

        while let Some(raw) = tables.try_next().await? {
            if self.is_excluded(&raw.name) {
                continue;
            }
            normalized.push(normalize_table(raw, &mut warnings));
        }

        for warning in &warnings {
            warn!(
                "Unsupported type '{}' on {}.{}, treating as STRING",
                warning.vendor_type, warning.table, warning.column
            );
        }

        Ok(Analysis {
            model: SchemaModel::new(normalized),
            warnings,
        })
    }

    /// Acquire a pooled connection, retrying with jittered backoff
    async fn connect(&self, pool: &Pool) -> EngineResult<deadpool_postgres::Client> {
        let mut attempt = 0;
        loop {
            match pool.get().await {
                Ok(client) => return Ok(client),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_backoff, attempt);
                    warn!(
                        "Connection attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(EngineError::from(e)),
            }
        }
    }

    fn is_excluded(&self, table: &str) -> bool {
        table == self.ledger_table || self.config.exclude_tables.iter().any(|t| t == table)
    }
}

#[async_trait]
impl SchemaProvider for SchemaAnalyzer {
    async fn analyze(&self) -> EngineResult<Analysis> {
        let analysis = match &self.source {
            SchemaSource::LiveConnection(pool) => self.analyze_live(pool).await?,
            SchemaSource::StaticDefinitionFile(path) => self.analyze_file(path).await?,
        };

        info!(
            "Analyzed {}: {} tables, {} columns, {} warnings",
            self.source.describe(),
            analysis.model.tables.len(),
            analysis.model.column_count(),
            analysis.warnings.len()
        );

        Ok(analysis)
    }
}

fn normalize_table(raw: RawTable, warnings: &mut Vec<UnsupportedTypeWarning>) -> Table {
    let columns = raw
        .columns
        .into_iter()
        .enumerate()
        .map(|(position, column)| {
            let data_type = CanonicalType::from_vendor(&column.vendor_type).unwrap_or_else(|| {
                warnings.push(UnsupportedTypeWarning {
                    table: raw.name.clone(),
                    column: column.name.clone(),
                    vendor_type: column.vendor_type.clone(),
                });
                CanonicalType::String(None)
            });

            Column {
                name: column.name,
                data_type,
                nullable: column.nullable,
                default: column.default,
                ordinal: column.ordinal.unwrap_or(position as i32 + 1),
            }
        })
        .collect();

    Table {
        name: raw.name,
        columns,
        indexes: raw.indexes,
        constraints: raw.constraints,
    }
}

/// Exponential backoff with up to 50% jitter
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(6).saturating_sub(1));
    let jitter_ms = (exp.as_millis() as u64) / 2;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    exp + Duration::from_millis(jitter)
}
