//! Engine facade
//!
//! Owns one instance of every component and exposes the verbs the HTTP
//! layer (and any other front end) calls. Each verb returns a serializable
//! payload or an `EngineError`.

use crate::config::Settings;
use crate::drift::{detector::DriftDetector, DriftReport};
use crate::error::{EngineError, EngineResult};
use crate::migration::file::FileFormat;
use crate::migration::{
    Migration, MigrationGenerator, MigrationManager, MigrationRepository, MigrationStatusEntry,
    MigrationTarget, PostgresTarget, RollbackReport, RunOptions, RunReport,
};
use crate::monitor::{DriftCycle, DriftMonitor, MonitorEvents};
use crate::schema::{SchemaAnalyzer, SchemaProvider, SchemaSource, UnsupportedTypeWarning};
use crate::snapshot::{SnapshotMetadata, SnapshotStore};
use crate::typegen::{self, TypeDefinition};
use crate::validation::{Artifact, ArtifactKind, ValidationReport, Validator};
use deadpool_postgres::Pool;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMigration {
    pub version: u64,
    pub name: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaAnalysis {
    pub snapshot: SnapshotMetadata,
    pub baseline_version: Option<u64>,
    pub warnings: Vec<UnsupportedTypeWarning>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftFix {
    /// Drift of the live schema against the baseline
    pub report: DriftReport,
    /// Migrations that bring the live schema back to the baseline
    pub migrations: Vec<CreatedMigration>,
    pub applied: Option<RunReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub interval_secs: Option<u64>,
}

pub struct Engine {
    provider: Arc<dyn SchemaProvider>,
    snapshots: Arc<SnapshotStore>,
    manager: MigrationManager,
    validator: Validator,
    cycle: Arc<DriftCycle>,
    monitor: DriftMonitor,
    default_interval: Duration,
    cancel: watch::Sender<bool>,
}

impl Engine {
    /// Engine against a live PostgreSQL database, with file-backed
    /// snapshots and migrations
    pub async fn open(settings: &Settings, pool: Pool) -> EngineResult<Self> {
        let snapshots = Arc::new(SnapshotStore::open(&settings.schema.snapshot_dir).await?);
        let repository = Arc::new(MigrationRepository::open(&settings.migration.migrations_dir).await?);

        let provider = Arc::new(SchemaAnalyzer::new(
            SchemaSource::LiveConnection(pool.clone()),
            settings.schema.clone(),
            settings.migration.ledger_table.clone(),
        ));
        let target = Arc::new(PostgresTarget::new(pool, settings.migration.ledger_table.clone()));

        Ok(Self::from_parts(provider, target, snapshots, repository, settings))
    }

    pub fn from_parts(
        provider: Arc<dyn SchemaProvider>,
        target: Arc<dyn MigrationTarget>,
        snapshots: Arc<SnapshotStore>,
        repository: Arc<MigrationRepository>,
        settings: &Settings,
    ) -> Self {
        let cycle = Arc::new(DriftCycle::new(
            provider.clone(),
            snapshots.clone(),
            DriftDetector::new(settings.drift.clone()),
        ));
        let (cancel, _) = watch::channel(false);

        Self {
            provider,
            snapshots,
            manager: MigrationManager::new(target, repository, settings.migration.clone()),
            validator: Validator::new(settings.validation.clone()),
            monitor: DriftMonitor::new(cycle.clone(), &settings.monitoring),
            cycle,
            default_interval: settings.monitoring.interval,
            cancel,
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    pub async fn migrate(&self, force: bool, retry_failed: bool) -> EngineResult<RunReport> {
        self.manager
            .run_migrations(RunOptions {
                force,
                retry_failed,
                cancel: Some(self.cancel.subscribe()),
            })
            .await
    }

    /// Write an empty SQL migration for hand authoring
    pub async fn migrate_create(&self, name: &str) -> EngineResult<CreatedMigration> {
        let migration = MigrationGenerator::generate_empty(name);
        self.register(migration, FileFormat::Sql).await
    }

    pub async fn migrate_status(&self) -> EngineResult<Vec<MigrationStatusEntry>> {
        self.manager.get_migration_status().await
    }

    pub async fn migrate_rollback(&self, steps: usize) -> EngineResult<RollbackReport> {
        self.manager.rollback_migrations(steps).await
    }

    /// Snapshot the live schema and compare it with the baseline
    pub async fn drift_check(&self) -> EngineResult<DriftReport> {
        self.cycle.run().await
    }

    /// Generate (and optionally apply) migrations restoring the baseline
    pub async fn drift_fix(&self, apply: bool) -> EngineResult<DriftFix> {
        let report = self.drift_check().await?;
        if !report.has_drift {
            return Ok(DriftFix {
                report,
                migrations: Vec::new(),
                applied: None,
            });
        }

        let (baseline, current) = self
            .snapshots
            .compare_versions(report.baseline_version, report.current_version)
            .await?;
        let restore = self.cycle.restore_report(&baseline, &current);

        let mut migrations = Vec::new();
        for migration in MigrationGenerator::generate_from_drift(&restore) {
            migrations.push(self.register(migration, FileFormat::Json).await?);
        }
        info!("Generated {} migration(s) to restore baseline v{}", migrations.len(), baseline.version);

        let applied = if apply && !migrations.is_empty() {
            Some(self.migrate(false, false).await?)
        } else {
            None
        };

        Ok(DriftFix {
            report,
            migrations,
            applied,
        })
    }

    /// Analyze and store a snapshot; it becomes the baseline when asked to
    /// or when none exists yet
    pub async fn schema_analyze(&self, set_baseline: bool) -> EngineResult<SchemaAnalysis> {
        let analysis = self.provider.analyze().await?;
        let snapshot = self.snapshots.save(analysis.model).await?;

        if set_baseline || self.snapshots.get_baseline().await.is_none() {
            self.snapshots.set_baseline(snapshot.version).await?;
        }
        let baseline_version = self.snapshots.get_baseline().await.map(|b| b.version);

        Ok(SchemaAnalysis {
            snapshot: SnapshotMetadata::from_snapshot(&snapshot, baseline_version),
            baseline_version,
            warnings: analysis.warnings,
        })
    }

    pub async fn schema_types(&self) -> EngineResult<Vec<TypeDefinition>> {
        let analysis = self.provider.analyze().await?;
        Ok(typegen::describe(&analysis.model))
    }

    pub async fn validate_routes(&self, routes: Vec<Artifact>) -> EngineResult<ValidationReport> {
        self.validate(routes, ArtifactKind::Route).await
    }

    pub async fn validate_forms(&self, forms: Vec<Artifact>) -> EngineResult<ValidationReport> {
        self.validate(forms, ArtifactKind::Form).await
    }

    async fn validate(&self, mut artifacts: Vec<Artifact>, kind: ArtifactKind) -> EngineResult<ValidationReport> {
        for artifact in &mut artifacts {
            artifact.kind = kind;
        }
        let analysis = self.provider.analyze().await?;
        let results = self.validator.validate(&analysis.model, &artifacts);
        Ok(ValidationReport::from_results(results))
    }

    pub async fn monitor_start(&self, interval: Option<Duration>) -> EngineResult<MonitorStatus> {
        let interval = interval.unwrap_or(self.default_interval);
        self.monitor.start(interval).await?;
        Ok(MonitorStatus {
            running: true,
            interval_secs: Some(interval.as_secs()),
        })
    }

    pub async fn monitor_stop(&self) -> EngineResult<MonitorStatus> {
        self.monitor.stop().await?;
        Ok(MonitorStatus {
            running: false,
            interval_secs: None,
        })
    }

    pub async fn monitor_events(&self) -> MonitorEvents {
        self.monitor.subscribe().await
    }

    /// Stop the monitor and cancel queued migrations at the next boundary
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.cancel.send_replace(true);
        self.monitor.stop().await
    }

    async fn register(&self, migration: Migration, format: FileFormat) -> EngineResult<CreatedMigration> {
        let version = migration.version;
        let name = migration.name.clone();
        if self.manager.repository().contains(version).await {
            return Err(EngineError::Conflict(format!(
                "migration version {} already exists, retry in a second",
                version
            )));
        }
        let path = self.manager.repository().write(migration, format).await?;
        Ok(CreatedMigration { version, name, path })
    }
}
