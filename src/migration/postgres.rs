//! PostgreSQL migration target
//!
//! The ledger lives in the target database itself and migrations are
//! serialized with a session-level advisory lock, so separate processes
//! (CI and an operator, say) cannot interleave.

use super::ledger::{Ledger, MigrationRecord};
use super::operation::quote;
use super::target::{MigrationSession, MigrationTarget, TransactionPlan};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tracing::debug;

pub struct PostgresTarget {
    pool: Pool,
    ledger_table: String,
}

impl PostgresTarget {
    pub fn new(pool: Pool, ledger_table: impl Into<String>) -> Self {
        Self {
            pool,
            ledger_table: ledger_table.into(),
        }
    }
}

#[async_trait]
impl MigrationTarget for PostgresTarget {
    async fn session(&self) -> EngineResult<Box<dyn MigrationSession>> {
        let client = self.pool.get().await?;
        Ok(Box::new(PostgresSession {
            client,
            ledger_table: self.ledger_table.clone(),
        }))
    }
}

/// One pooled connection; advisory locks are bound to it
struct PostgresSession {
    client: deadpool_postgres::Client,
    ledger_table: String,
}

impl PostgresSession {
    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {} (version, name, checksum, status, applied_at, rolled_back_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (version) DO UPDATE SET
                name = EXCLUDED.name,
                checksum = EXCLUDED.checksum,
                status = EXCLUDED.status,
                applied_at = EXCLUDED.applied_at,
                rolled_back_at = EXCLUDED.rolled_back_at
            "#,
            quote(&self.ledger_table)
        )
    }
}

fn db_version(version: u64) -> EngineResult<i64> {
    i64::try_from(version)
        .map_err(|_| EngineError::Validation(format!("migration version {} is out of range", version)))
}

#[async_trait]
impl MigrationSession for PostgresSession {
    async fn ensure_ledger(&mut self) -> EngineResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                status TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL,
                rolled_back_at TIMESTAMPTZ
            )
            "#,
            quote(&self.ledger_table)
        );
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }

    async fn try_lock(&mut self, key: i64) -> EngineResult<bool> {
        let row = self
            .client
            .query_one("SELECT pg_try_advisory_lock($1) AS locked", &[&key])
            .await?;
        Ok(row.get("locked"))
    }

    async fn unlock(&mut self, key: i64) -> EngineResult<()> {
        let row = self
            .client
            .query_one("SELECT pg_advisory_unlock($1) AS released", &[&key])
            .await?;
        let released: bool = row.get("released");
        if !released {
            debug!("Advisory lock {} was not held by this session", key);
        }
        Ok(())
    }

    async fn ledger(&mut self) -> EngineResult<Ledger> {
        let present = self
            .client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = current_schema() AND table_name = $1
                ) AS present
                "#,
                &[&self.ledger_table],
            )
            .await?;
        if !present.get::<_, bool>("present") {
            return Ok(Ledger::default());
        }

        let query = format!(
            r#"
            SELECT version, name, checksum, status, applied_at, rolled_back_at
            FROM {}
            ORDER BY version
            "#,
            quote(&self.ledger_table)
        );
        let rows = self.client.query(&query, &[]).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row.get("version");
            let status: String = row.get("status");
            records.push(MigrationRecord {
                version: u64::try_from(version).map_err(|_| {
                    EngineError::Internal(format!("negative version {} in ledger", version))
                })?,
                name: row.get("name"),
                checksum: row.get("checksum"),
                status: status.parse()?,
                applied_at: row.get::<_, DateTime<Utc>>("applied_at"),
                rolled_back_at: row.get("rolled_back_at"),
            });
        }

        Ok(Ledger::from_records(records))
    }

    async fn execute(&mut self, plan: &TransactionPlan) -> EngineResult<()> {
        let upsert = self.upsert_sql();
        let transaction = self.client.transaction().await?;

        let before = &plan.before;
        transaction
            .execute(
                &upsert,
                &[
                    &db_version(before.version)?,
                    &before.name,
                    &before.checksum,
                    &before.status.as_str(),
                    &before.applied_at,
                    &before.rolled_back_at,
                ],
            )
            .await?;

        for operation in &plan.operations {
            for statement in operation.to_sql() {
                debug!("Executing: {}", statement);
                // Dropping the transaction on error rolls it back
                transaction.batch_execute(&statement).await.map_err(|e| {
                    EngineError::Execution(format!("{} failed: {}", operation.describe(), e))
                })?;
            }
        }

        let after = &plan.after;
        transaction
            .execute(
                &upsert,
                &[
                    &db_version(after.version)?,
                    &after.name,
                    &after.checksum,
                    &after.status.as_str(),
                    &after.applied_at,
                    &after.rolled_back_at,
                ],
            )
            .await?;

        transaction.commit().await?;
        Ok(())
    }

    async fn record(&mut self, record: &MigrationRecord) -> EngineResult<()> {
        let upsert = self.upsert_sql();
        self.client
            .execute(
                &upsert,
                &[
                    &db_version(record.version)?,
                    &record.name,
                    &record.checksum,
                    &record.status.as_str(),
                    &record.applied_at,
                    &record.rolled_back_at,
                ],
            )
            .await?;
        Ok(())
    }
}
