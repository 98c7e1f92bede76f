//! Migration manager
//!
//! Applies and rolls back registered migrations against a target. Every
//! ledger mutation happens while holding the advisory lock, and each
//! migration runs in its own transaction.

use super::ledger::{Ledger, MigrationRecord, MigrationStatus};
use super::repository::MigrationRepository;
use super::target::{MigrationSession, MigrationTarget, TransactionPlan};
use super::Migration;
use crate::config::MigrationConfig;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Options for `run_migrations`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Apply despite checksum mismatches and out-of-order versions
    pub force: bool,
    /// Re-attempt migrations recorded as FAILED
    pub retry_failed: bool,
    /// Checked between migrations; `true` stops the queue
    pub cancel: Option<watch::Receiver<bool>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub applied: Vec<u64>,
    /// Applied by another invocation while this one waited
    pub skipped: Vec<u64>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub rolled_back: Vec<u64>,
}

/// One version as seen from both the files and the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusEntry {
    pub version: u64,
    pub name: String,
    pub status: MigrationStatus,
    pub checksum: String,
    pub applied_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// False when the ledger knows a version no file defines anymore
    pub file_present: bool,
}

#[derive(Clone)]
pub struct MigrationManager {
    target: Arc<dyn MigrationTarget>,
    repository: Arc<MigrationRepository>,
    config: MigrationConfig,
}

impl MigrationManager {
    pub fn new(
        target: Arc<dyn MigrationTarget>,
        repository: Arc<MigrationRepository>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            target,
            repository,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<MigrationRepository> {
        &self.repository
    }

    /// Registered migrations not yet in the ledger, version ascending
    pub async fn get_pending_migrations(&self, retry_failed: bool) -> EngineResult<Vec<Migration>> {
        let mut session = self.target.session().await?;
        let ledger = session.ledger().await?;
        Ok(self.pending_from(&ledger, retry_failed).await)
    }

    async fn pending_from(&self, ledger: &Ledger, retry_failed: bool) -> Vec<Migration> {
        self.repository
            .all()
            .await
            .into_iter()
            .filter(|m| match ledger.get(m.version) {
                None => true,
                Some(record) => retry_failed && record.status == MigrationStatus::Failed,
            })
            .collect()
    }

    /// Apply pending migrations in version order
    ///
    /// Stops at the first failure; migrations committed before it stay
    /// applied and are listed in the returned `PartialApplyFailure`.
    pub async fn run_migrations(&self, options: RunOptions) -> EngineResult<RunReport> {
        let mut session = self.target.session().await?;
        session.ensure_ledger().await?;

        let ledger = session.ledger().await?;
        self.verify_completed(&ledger, options.force).await?;

        let queue = self.pending_from(&ledger, options.retry_failed).await;
        let mut report = RunReport::default();
        if queue.is_empty() {
            info!("No pending migrations");
            return Ok(report);
        }
        info!("{} pending migration(s)", queue.len());

        for migration in queue {
            if is_cancelled(&options.cancel) {
                info!("Migration run cancelled before {}", migration.version);
                report.cancelled = true;
                break;
            }

            // The locked section runs detached so a dropped caller cannot skip the unlock
            let step = tokio::spawn(self.clone().apply_one(
                session,
                migration.version,
                options.clone(),
                report.applied.clone(),
            ));
            let (returned, outcome) = step
                .await
                .map_err(|e| EngineError::Internal(format!("migration task failed: {}", e)))?;
            session = returned;

            if outcome? {
                report.applied.push(migration.version);
            } else {
                report.skipped.push(migration.version);
            }
        }

        Ok(report)
    }

    /// Lock, apply one version, unlock; hands the session back for the next one
    async fn apply_one(
        self,
        mut session: Box<dyn MigrationSession>,
        version: u64,
        options: RunOptions,
        applied: Vec<u64>,
    ) -> (Box<dyn MigrationSession>, EngineResult<bool>) {
        if let Err(e) = self.acquire_lock(session.as_mut()).await {
            return (session, Err(e));
        }
        let outcome = self
            .apply_locked(session.as_mut(), version, &options, &applied)
            .await;
        let released = session.unlock(self.config.lock_key).await;

        let outcome = outcome.and_then(|done| released.map(|_| done));
        (session, outcome)
    }

    /// Returns `false` when another invocation applied the version first
    async fn apply_locked(
        &self,
        session: &mut dyn MigrationSession,
        version: u64,
        options: &RunOptions,
        applied: &[u64],
    ) -> EngineResult<bool> {
        let ledger = session.ledger().await?;
        let existing = ledger.get(version).cloned();
        match existing.as_ref().map(|r| r.status) {
            None => {}
            Some(MigrationStatus::Failed) if options.retry_failed => {}
            Some(status) => {
                debug!("Migration {} is already {}, skipping", version, status);
                return Ok(false);
            }
        }

        if let Some(latest) = ledger.max_completed_version() {
            if version < latest {
                if !options.force {
                    return Err(EngineError::OutOfOrder { version, latest });
                }
                warn!("Forcing out-of-order migration {} (latest applied {})", version, latest);
            }
        }

        let migration = match self.repository.fresh(version).await {
            Ok(migration) => migration,
            Err(e @ EngineError::ChecksumMismatch { .. }) if options.force => {
                warn!("{}; applying registered content because force is set", e);
                self.repository
                    .get(version)
                    .await
                    .ok_or_else(|| EngineError::NotFound(format!("migration {} is not registered", version)))?
            }
            Err(e) => return Err(e),
        };

        let applied_at = ledger.next_applied_at(Utc::now());
        let start = match existing {
            Some(record) => MigrationRecord {
                name: migration.name.clone(),
                checksum: migration.checksum.clone(),
                applied_at,
                ..record
            },
            None => MigrationRecord {
                version,
                name: migration.name.clone(),
                checksum: migration.checksum.clone(),
                status: MigrationStatus::Pending,
                applied_at,
                rolled_back_at: None,
            },
        };
        let before = start.transition(MigrationStatus::Applying)?;
        let after = before.transition(MigrationStatus::Completed)?;
        let plan = TransactionPlan {
            before,
            operations: migration.up.clone(),
            after,
        };

        info!("⬆️  Applying migration {} ({})", version, migration.name);
        if let Err(e) = session.execute(&plan).await {
            error!("❌ Migration {} failed: {}", version, e);
            let failed = plan.before.transition(MigrationStatus::Failed)?;
            if let Err(record_err) = session.record(&failed).await {
                error!("Could not record failure of migration {}: {}", version, record_err);
            }
            return Err(EngineError::PartialApplyFailure {
                version,
                applied: applied.to_vec(),
                reason: e.to_string(),
            });
        }

        info!("✅ Migration {} completed", version);
        Ok(true)
    }

    /// Roll back the last `steps` completed migrations, newest application first
    pub async fn rollback_migrations(&self, steps: usize) -> EngineResult<RollbackReport> {
        let mut session = self.target.session().await?;
        session.ensure_ledger().await?;

        let this = self.clone();
        tokio::spawn(async move {
            this.acquire_lock(session.as_mut()).await?;
            let outcome = this.rollback_locked(session.as_mut(), steps).await;
            let released = session.unlock(this.config.lock_key).await;

            let report = outcome?;
            released?;
            Ok::<_, EngineError>(report)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("rollback task failed: {}", e)))?
    }

    async fn rollback_locked(
        &self,
        session: &mut dyn MigrationSession,
        steps: usize,
    ) -> EngineResult<RollbackReport> {
        let ledger = session.ledger().await?;
        let targets: Vec<MigrationRecord> = ledger
            .completed_by_application_time()
            .into_iter()
            .rev()
            .take(steps)
            .cloned()
            .collect();

        let mut report = RollbackReport::default();
        for record in targets {
            let migration = self.verified(&record).await?;
            if !migration.is_reversible() {
                return Err(EngineError::NoRollbackAvailable {
                    version: record.version,
                });
            }

            let before = record.transition(MigrationStatus::RollingBack)?;
            let mut after = before.transition(MigrationStatus::RolledBack)?;
            after.rolled_back_at = Some(Utc::now());
            let plan = TransactionPlan {
                before,
                operations: migration.down.clone(),
                after,
            };

            info!("⬇️  Rolling back migration {} ({})", record.version, record.name);
            session.execute(&plan).await.map_err(|e| {
                error!("❌ Rollback of migration {} failed: {}", record.version, e);
                e
            })?;
            report.rolled_back.push(record.version);
        }

        Ok(report)
    }

    /// Read-only merge of registered files and the ledger
    pub async fn get_migration_status(&self) -> EngineResult<Vec<MigrationStatusEntry>> {
        let mut session = self.target.session().await?;
        let ledger = session.ledger().await?;

        let mut entries: BTreeMap<u64, MigrationStatusEntry> = self
            .repository
            .all()
            .await
            .into_iter()
            .map(|m| {
                (
                    m.version,
                    MigrationStatusEntry {
                        version: m.version,
                        name: m.name,
                        status: MigrationStatus::Pending,
                        checksum: m.checksum,
                        applied_at: None,
                        rolled_back_at: None,
                        file_present: true,
                    },
                )
            })
            .collect();

        for record in ledger.records() {
            let entry = entries.entry(record.version).or_insert_with(|| MigrationStatusEntry {
                version: record.version,
                name: record.name.clone(),
                status: record.status,
                checksum: record.checksum.clone(),
                applied_at: None,
                rolled_back_at: None,
                file_present: false,
            });
            entry.status = record.status;
            entry.applied_at = Some(record.applied_at);
            entry.rolled_back_at = record.rolled_back_at;
        }

        Ok(entries.into_values().collect())
    }

    /// Re-verify every completed migration against its file
    pub async fn verify_checksums(&self) -> EngineResult<Vec<u64>> {
        let mut session = self.target.session().await?;
        let ledger = session.ledger().await?;

        let mut verified = Vec::new();
        for record in ledger.completed_by_application_time() {
            self.verified(record).await?;
            verified.push(record.version);
        }
        verified.sort_unstable();
        Ok(verified)
    }

    async fn verify_completed(&self, ledger: &Ledger, force: bool) -> EngineResult<()> {
        for record in ledger.completed_by_application_time() {
            match self.verified(record).await {
                Ok(_) => {}
                Err(EngineError::NotFound(msg)) => warn!("{}", msg),
                Err(e @ EngineError::ChecksumMismatch { .. }) if force => {
                    warn!("{}; continuing because force is set", e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The registered migration for a ledger record, checked against both
    /// the file content and the checksum recorded at application time
    async fn verified(&self, record: &MigrationRecord) -> EngineResult<Migration> {
        let migration = self.repository.fresh(record.version).await.map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!(
                "ledger entry {} ({}) has no registered migration file",
                record.version, record.name
            )),
            other => other,
        })?;

        if migration.checksum != record.checksum {
            return Err(EngineError::ChecksumMismatch {
                version: record.version,
                expected: record.checksum.clone(),
                actual: migration.checksum,
            });
        }
        Ok(migration)
    }

    /// Poll the advisory lock with jittered sleeps until `lock_timeout`
    async fn acquire_lock(&self, session: &mut dyn MigrationSession) -> EngineResult<()> {
        let started = Instant::now();
        loop {
            if session.try_lock(self.config.lock_key).await? {
                debug!("Acquired migration lock {}", self.config.lock_key);
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                warn!("Gave up on migration lock after {:?}", waited);
                return Err(EngineError::LockTimeout { waited });
            }

            let poll = self.config.lock_poll_interval;
            let jitter_ms = rand::thread_rng().gen_range(0..=poll.as_millis() as u64 / 2);
            let delay = (poll + Duration::from_millis(jitter_ms)).min(self.config.lock_timeout - waited);
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{InMemoryTarget, Operation};
    use crate::schema::model::fixtures::{column, users};
    use crate::schema::CanonicalType;
    use pretty_assertions::assert_eq;

    fn create_users() -> Migration {
        Migration::new(
            1,
            "create_users",
            vec![Operation::CreateTable { table: users() }],
            vec![Operation::DropTable { table: users() }],
        )
    }

    fn add_name() -> Migration {
        let name = column("name", CanonicalType::Text, true, 3);
        Migration::new(
            2,
            "add_name",
            vec![Operation::AddColumn {
                table: "users".into(),
                column: name.clone(),
            }],
            vec![Operation::DropColumn {
                table: "users".into(),
                column: name,
            }],
        )
    }

    async fn manager(target: &InMemoryTarget, migrations: Vec<Migration>) -> MigrationManager {
        let repository = Arc::new(MigrationRepository::in_memory());
        for migration in migrations {
            repository.register(migration).await.unwrap();
        }
        let config = MigrationConfig {
            lock_timeout: Duration::from_millis(100),
            lock_poll_interval: Duration::from_millis(10),
            ..MigrationConfig::default()
        };
        MigrationManager::new(Arc::new(target.clone()), repository, config)
    }

    #[tokio::test]
    async fn test_run_applies_in_order_and_is_idempotent() {
        let target = InMemoryTarget::new();
        let manager = manager(&target, vec![add_name(), create_users()]).await;

        let report = manager.run_migrations(RunOptions::default()).await.unwrap();
        assert_eq!(report.applied, vec![1, 2]);
        assert!(target.model().await.has_column("users", "name"));

        let again = manager.run_migrations(RunOptions::default()).await.unwrap();
        assert!(again.applied.is_empty());
        assert!(manager.get_pending_migrations(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_merges_files_and_ledger() {
        let target = InMemoryTarget::new();
        let manager = manager(&target, vec![create_users(), add_name()]).await;
        manager.run_migrations(RunOptions::default()).await.unwrap();
        manager.rollback_migrations(1).await.unwrap();

        let status: Vec<(u64, MigrationStatus)> = manager
            .get_migration_status()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.version, e.status))
            .collect();
        assert_eq!(
            status,
            vec![(1, MigrationStatus::Completed), (2, MigrationStatus::RolledBack)]
        );
        assert!(!target.model().await.has_column("users", "name"));
    }

    #[tokio::test]
    async fn test_rolled_back_version_is_not_reapplied() {
        let target = InMemoryTarget::new();
        let manager = manager(&target, vec![create_users(), add_name()]).await;
        manager.run_migrations(RunOptions::default()).await.unwrap();
        manager.rollback_migrations(1).await.unwrap();

        let report = manager.run_migrations(RunOptions::default()).await.unwrap();
        assert!(report.applied.is_empty());
        assert!(!target.model().await.has_column("users", "name"));
    }

    #[tokio::test]
    async fn test_cancel_before_first_migration() {
        let target = InMemoryTarget::new();
        let manager = manager(&target, vec![create_users()]).await;
        let (_tx, rx) = watch::channel(true);

        let report = manager
            .run_migrations(RunOptions {
                cancel: Some(rx),
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.applied.is_empty());
        assert!(target.model().await.tables.is_empty());
    }

    #[tokio::test]
    async fn test_verify_checksums_lists_completed() {
        let target = InMemoryTarget::new();
        let manager = manager(&target, vec![create_users(), add_name()]).await;
        manager.run_migrations(RunOptions::default()).await.unwrap();
        assert_eq!(manager.verify_checksums().await.unwrap(), vec![1, 2]);
    }
}
