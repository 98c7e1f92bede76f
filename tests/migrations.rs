//! Migration manager scenarios against the in-memory target

mod common;

use async_trait::async_trait;
use common::*;
use pretty_assertions::assert_eq;
use schemaflow_engine::config::MigrationConfig;
use schemaflow_engine::migration::file::FileFormat;
use schemaflow_engine::migration::ledger::Ledger;
use schemaflow_engine::migration::{
    InMemoryTarget, Migration, MigrationGenerator, MigrationManager, MigrationRecord,
    MigrationRepository, MigrationSession, MigrationStatus, MigrationTarget, Operation,
    RunOptions, TransactionPlan,
};
use schemaflow_engine::schema::{CanonicalType, Index};
use schemaflow_engine::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;

// ── Failure mid-batch ─────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_migration_halts_batch() {
    let target = InMemoryTarget::new();

    // #2 adds a column and then runs a statement the target rejects
    let phone = col("phone", CanonicalType::String(Some(32)), true, 3);
    let broken = Migration::new(
        2,
        "add_phone",
        vec![
            Operation::AddColumn {
                table: "users".into(),
                column: phone.clone(),
            },
            Operation::RawSql {
                sql: "UPDATE users SET phone = 'n/a';".into(),
            },
        ],
        vec![Operation::DropColumn {
            table: "users".into(),
            column: phone,
        }],
    );
    let index = Migration::new(
        3,
        "index_email",
        vec![Operation::CreateIndex {
            table: "users".into(),
            index: Index {
                name: "users_email_idx".into(),
                columns: vec!["email".into()],
                unique: false,
            },
        }],
        vec![],
    );

    let repository = in_memory_repository(vec![create_users(1), broken, index]).await;
    let manager = manager_with(&target, repository).await;

    let err = manager.run_migrations(RunOptions::default()).await.unwrap_err();
    match err {
        EngineError::PartialApplyFailure {
            version, applied, ..
        } => {
            assert_eq!(version, 2);
            assert_eq!(applied, vec![1]);
        }
        other => panic!("expected PartialApplyFailure, got {:?}", other),
    }

    let status: Vec<(u64, MigrationStatus)> = manager
        .get_migration_status()
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.version, e.status))
        .collect();
    assert_eq!(
        status,
        vec![
            (1, MigrationStatus::Completed),
            (2, MigrationStatus::Failed),
            (3, MigrationStatus::Pending),
        ]
    );

    // No partial column from the rolled back transaction
    let model = target.model().await;
    assert!(model.has_column("users", "email"));
    assert!(!model.has_column("users", "phone"));
    assert!(model.table("users").unwrap().indexes.is_empty());
}

#[tokio::test]
async fn test_failed_migration_retried_only_on_request() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        // Fails while users does not exist yet
        add_column(1, "users", col("nickname", CanonicalType::Text, true, 3)),
    ])
    .await;
    let manager = manager_with(&target, repository.clone()).await;

    assert!(manager.run_migrations(RunOptions::default()).await.is_err());

    // Without retry_failed the FAILED entry is not pending
    assert!(manager.get_pending_migrations(false).await.unwrap().is_empty());
    let report = manager.run_migrations(RunOptions::default()).await.unwrap();
    assert!(report.applied.is_empty());

    // Fix the schema out of band, then retry explicitly
    target.set_model(model(vec![users()])).await;
    let report = manager
        .run_migrations(RunOptions {
            retry_failed: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(report.applied, vec![1]);
    assert!(target.model().await.has_column("users", "nickname"));
}

// ── Ordering ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_out_of_order_refused_unless_forced() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        create_users(1),
        add_column(3, "users", col("age", CanonicalType::SmallInt, true, 3)),
    ])
    .await;
    let manager = manager_with(&target, repository.clone()).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    // A late-arriving migration older than the latest applied one
    repository
        .register(add_column(2, "users", col("bio", CanonicalType::Text, true, 4)))
        .await
        .unwrap();

    let err = manager.run_migrations(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { version: 2, latest: 3 }));

    let report = manager
        .run_migrations(RunOptions {
            force: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(report.applied, vec![2]);
}

#[tokio::test]
async fn test_rollback_follows_application_time() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        create_users(1),
        add_column(3, "users", col("age", CanonicalType::SmallInt, true, 3)),
    ])
    .await;
    let manager = manager_with(&target, repository.clone()).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    repository
        .register(add_column(2, "users", col("bio", CanonicalType::Text, true, 4)))
        .await
        .unwrap();
    manager
        .run_migrations(RunOptions {
            force: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    // Applied order is 1, 3, 2: the newest application goes first
    let report = manager.rollback_migrations(1).await.unwrap();
    assert_eq!(report.rolled_back, vec![2]);
    let model = target.model().await;
    assert!(!model.has_column("users", "bio"));
    assert!(model.has_column("users", "age"));

    let report = manager.rollback_migrations(1).await.unwrap();
    assert_eq!(report.rolled_back, vec![3]);
}

#[tokio::test]
async fn test_ledger_application_times_strictly_increase() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        create_users(1),
        add_column(2, "users", col("a", CanonicalType::Text, true, 3)),
        add_column(3, "users", col("b", CanonicalType::Text, true, 4)),
        add_column(4, "users", col("c", CanonicalType::Text, true, 5)),
    ])
    .await;
    let manager = manager_with(&target, repository).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    let mut records = target.ledger_records().await;
    records.sort_by_key(|r| r.applied_at);
    let versions: Vec<u64> = records.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert!(records.windows(2).all(|w| w[0].applied_at < w[1].applied_at));
}

// ── Rollback edge cases ─────────────────────────────────────────────────

#[tokio::test]
async fn test_rollback_without_down_aborts_batch() {
    let target = InMemoryTarget::new();
    let irreversible = Migration::new(
        2,
        "add_flag",
        vec![Operation::AddColumn {
            table: "users".into(),
            column: col("flag", CanonicalType::Boolean, true, 3),
        }],
        vec![],
    );
    let repository = in_memory_repository(vec![create_users(1), irreversible]).await;
    let manager = manager_with(&target, repository).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    let err = manager.rollback_migrations(2).await.unwrap_err();
    assert!(matches!(err, EngineError::NoRollbackAvailable { version: 2 }));

    // Nothing after the irreversible migration was touched
    let status = manager.get_migration_status().await.unwrap();
    assert!(status.iter().all(|e| e.status == MigrationStatus::Completed));
    assert!(target.model().await.table("users").is_some());
}

#[tokio::test]
async fn test_rollback_of_unregistered_version_is_not_found() {
    let target = InMemoryTarget::new();
    let manager = manager_with(&target, in_memory_repository(vec![create_users(1)]).await).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    let stranger = manager_with(&target, in_memory_repository(vec![]).await).await;
    let err = stranger.rollback_migrations(1).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let status = stranger.get_migration_status().await.unwrap();
    assert_eq!(status.len(), 1);
    assert!(!status[0].file_present);
}

// ── Integrity ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tampered_file_detected_after_apply() {
    let dir = tempfile::tempdir().unwrap();
    let target = InMemoryTarget::new();

    let repository = Arc::new(MigrationRepository::open(dir.path()).await.unwrap());
    let path = repository
        .write(create_users(1), FileFormat::Json)
        .await
        .unwrap()
        .unwrap();
    let manager = manager_with(&target, repository).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    // Someone edits the applied migration and fixes up its checksum
    let mut edited = create_users(1);
    edited.up.push(Operation::CreateIndex {
        table: "users".into(),
        index: Index {
            name: "users_email_idx".into(),
            columns: vec!["email".into()],
            unique: true,
        },
    });
    let edited = Migration::new(edited.version, edited.name, edited.up, edited.down);
    tokio::fs::write(&path, serde_json::to_string_pretty(&edited).unwrap())
        .await
        .unwrap();

    // A fresh process loads the edited file
    let reloaded = Arc::new(MigrationRepository::open(dir.path()).await.unwrap());
    let manager = manager_with(&target, reloaded).await;

    let err = manager.verify_checksums().await.unwrap_err();
    assert!(matches!(err, EngineError::ChecksumMismatch { version: 1, .. }));
    let err = manager.run_migrations(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::ChecksumMismatch { version: 1, .. }));

    let forced = manager
        .run_migrations(RunOptions {
            force: true,
            ..RunOptions::default()
        })
        .await;
    tokio_test::assert_ok!(forced);
}

#[tokio::test]
async fn test_lock_held_elsewhere_times_out() {
    let target = InMemoryTarget::new();
    let manager = manager_with(&target, in_memory_repository(vec![create_users(1)]).await).await;

    let mut other = target.session().await.unwrap();
    assert!(other.try_lock(MigrationConfig::default().lock_key).await.unwrap());

    let err = manager.run_migrations(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(target.model().await.tables.is_empty());

    other.unlock(MigrationConfig::default().lock_key).await.unwrap();
    let report = manager.run_migrations(RunOptions::default()).await.unwrap();
    assert_eq!(report.applied, vec![1]);
}

// ── Generated migrations ────────────────────────────────────────────────

#[tokio::test]
async fn test_generated_table_drop_rolls_back() {
    let before = model(vec![users(), orders()]);
    let after = model(vec![users()]);
    let target = InMemoryTarget::with_model(before.clone());

    let migrations = MigrationGenerator::generate_from_desired_state_at(&before, &after, 1);
    let manager = manager_with(&target, in_memory_repository(migrations).await).await;

    manager.run_migrations(RunOptions::default()).await.unwrap();
    assert!(target.model().await.structurally_eq(&after));

    let report = manager.rollback_migrations(1).await.unwrap();
    assert_eq!(report.rolled_back, vec![1]);
    let restored = target.model().await;
    assert!(restored.structurally_eq(&before));
    assert_eq!(restored.table("orders").unwrap().foreign_keys().count(), 1);
}

// ── Abandoned callers ───────────────────────────────────────────────────

/// In-memory target whose transactions take `delay`
#[derive(Clone)]
struct SlowTarget {
    inner: InMemoryTarget,
    delay: Duration,
}

struct SlowSession {
    inner: Box<dyn MigrationSession>,
    delay: Duration,
}

#[async_trait]
impl MigrationTarget for SlowTarget {
    async fn session(&self) -> EngineResult<Box<dyn MigrationSession>> {
        Ok(Box::new(SlowSession {
            inner: self.inner.session().await?,
            delay: self.delay,
        }))
    }
}

#[async_trait]
impl MigrationSession for SlowSession {
    async fn ensure_ledger(&mut self) -> EngineResult<()> {
        self.inner.ensure_ledger().await
    }

    async fn try_lock(&mut self, key: i64) -> EngineResult<bool> {
        self.inner.try_lock(key).await
    }

    async fn unlock(&mut self, key: i64) -> EngineResult<()> {
        self.inner.unlock(key).await
    }

    async fn ledger(&mut self) -> EngineResult<Ledger> {
        self.inner.ledger().await
    }

    async fn execute(&mut self, plan: &TransactionPlan) -> EngineResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute(plan).await
    }

    async fn record(&mut self, record: &MigrationRecord) -> EngineResult<()> {
        self.inner.record(record).await
    }
}

fn slow_manager(target: &InMemoryTarget, repository: Arc<MigrationRepository>) -> MigrationManager {
    let slow = SlowTarget {
        inner: target.clone(),
        delay: Duration::from_millis(200),
    };
    MigrationManager::new(Arc::new(slow), repository, fast_lock_config())
}

#[tokio::test]
async fn test_abandoned_run_releases_lock() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        create_users(1),
        add_column(2, "users", col("bio", CanonicalType::Text, true, 3)),
    ])
    .await;

    let slow = slow_manager(&target, repository.clone());
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        slow.run_migrations(RunOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());

    // The in-flight migration still finishes and unlocks
    tokio::time::sleep(Duration::from_millis(400)).await;

    let manager = manager_with(&target, repository).await;
    let report = manager.run_migrations(RunOptions::default()).await.unwrap();
    assert_eq!(report.applied, vec![2]);

    let status = manager.get_migration_status().await.unwrap();
    assert!(status.iter().all(|e| e.status == MigrationStatus::Completed));
}

#[tokio::test]
async fn test_abandoned_rollback_releases_lock() {
    let target = InMemoryTarget::new();
    let repository = in_memory_repository(vec![
        create_users(1),
        add_column(2, "users", col("bio", CanonicalType::Text, true, 3)),
    ])
    .await;
    let manager = manager_with(&target, repository.clone()).await;
    manager.run_migrations(RunOptions::default()).await.unwrap();

    let slow = slow_manager(&target, repository);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), slow.rollback_migrations(1)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let report = manager.rollback_migrations(1).await.unwrap();
    assert_eq!(report.rolled_back, vec![1]);
    assert!(target.model().await.tables.is_empty());
}
