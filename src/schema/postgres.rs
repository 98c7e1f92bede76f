//! PostgreSQL introspection
//!
//! Reads tables one at a time from the system catalogs and yields them as a
//! stream, so a large schema is never materialized as one result set.

use super::analyzer::{RawColumn, RawTable};
use super::model::{Constraint, ForeignKeyTarget, Index};
use crate::error::EngineResult;
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

/// Catalog reader bound to one pooled connection and one schema
pub struct PostgresIntrospector<'a> {
    client: &'a deadpool_postgres::Client,
    schema: &'a str,
}

impl<'a> PostgresIntrospector<'a> {
    pub fn new(client: &'a deadpool_postgres::Client, schema: &'a str) -> Self {
        Self { client, schema }
    }

    /// Names of every base table in the schema
    pub async fn table_names(&self) -> EngineResult<Vec<String>> {
        let query = r#"
            SELECT t.table_name::text AS table_name
            FROM information_schema.tables t
            WHERE t.table_schema = $1
              AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;

        let rows = self.client.query(query, &[&self.schema]).await?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    /// Stream of tables, one catalog round-trip set per table
    pub fn tables(&self, names: Vec<String>) -> impl Stream<Item = EngineResult<RawTable>> + '_ {
        stream::iter(names).then(move |name| self.table(name))
    }

    async fn table(&self, name: String) -> EngineResult<RawTable> {
        let columns = self.columns(&name).await?;
        let indexes = self.indexes(&name).await?;
        let constraints = self.constraints(&name).await?;

        debug!(
            "Introspected {}.{}: {} columns, {} indexes, {} constraints",
            self.schema,
            name,
            columns.len(),
            indexes.len(),
            constraints.len()
        );

        Ok(RawTable {
            name,
            columns,
            indexes,
            constraints,
        })
    }

    async fn columns(&self, table: &str) -> EngineResult<Vec<RawColumn>> {
        let query = r#"
            SELECT
                a.attname::text AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                NOT a.attnotnull AS nullable,
                pg_get_expr(d.adbin, d.adrelid) AS column_default,
                a.attnum::int4 AS ordinal
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = self.client.query(query, &[&self.schema, &table]).await?;

        Ok(rows
            .iter()
            .map(|row| RawColumn {
                name: row.get("column_name"),
                vendor_type: row.get("data_type"),
                nullable: row.get("nullable"),
                default: row.get("column_default"),
                ordinal: Some(row.get("ordinal")),
            })
            .collect())
    }

    /// Indexes not backing a primary key, unique or exclusion constraint
    async fn indexes(&self, table: &str) -> EngineResult<Vec<Index>> {
        let query = r#"
            SELECT
                i.relname::text AS index_name,
                ix.indisunique AS is_unique,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns
            FROM pg_index ix
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1
              AND t.relname = $2
              AND NOT EXISTS (
                  SELECT 1 FROM pg_constraint con
                  WHERE con.conindid = ix.indexrelid
                    AND con.contype IN ('p', 'u', 'x')
              )
            ORDER BY i.relname
        "#;

        let rows = self.client.query(query, &[&self.schema, &table]).await?;

        Ok(rows
            .iter()
            .map(|row| Index {
                name: row.get("index_name"),
                columns: row.get("columns"),
                unique: row.get("is_unique"),
            })
            .collect())
    }

    async fn constraints(&self, table: &str) -> EngineResult<Vec<Constraint>> {
        let query = r#"
            SELECT
                con.conname::text AS constraint_name,
                con.contype::text AS constraint_type,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS columns,
                ref.relname::text AS referenced_table,
                ARRAY(
                    SELECT a.attname::text
                    FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                    ORDER BY k.ord
                ) AS referenced_columns,
                pg_get_constraintdef(con.oid) AS definition
            FROM pg_constraint con
            JOIN pg_class t ON t.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            LEFT JOIN pg_class ref ON ref.oid = con.confrelid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND con.contype IN ('p', 'f', 'c', 'u')
            ORDER BY con.conname
        "#;

        let rows = self.client.query(query, &[&self.schema, &table]).await?;

        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("constraint_name");
            let kind: String = row.get("constraint_type");
            let columns: Vec<String> = row.get("columns");

            let constraint = match kind.as_str() {
                "p" => Constraint::PrimaryKey { name, columns },
                "u" => Constraint::Unique { name, columns },
                "f" => {
                    let referenced_table: Option<String> = row.get("referenced_table");
                    Constraint::ForeignKey {
                        name,
                        columns,
                        references: ForeignKeyTarget {
                            table: referenced_table.unwrap_or_default(),
                            columns: row.get("referenced_columns"),
                        },
                    }
                }
                _ => {
                    let definition: String = row.get("definition");
                    Constraint::Check {
                        name,
                        expression: check_expression(&definition),
                    }
                }
            };
            constraints.push(constraint);
        }

        Ok(constraints)
    }
}

/// `CHECK ((price > 0))` -> `(price > 0)`
fn check_expression(definition: &str) -> String {
    let body = definition
        .strip_prefix("CHECK ")
        .unwrap_or(definition)
        .trim()
        .trim_end_matches(" NOT VALID");

    match body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        Some(inner) if inner.starts_with('(') => inner.to_string(),
        _ => body.to_string(),
    }
}
