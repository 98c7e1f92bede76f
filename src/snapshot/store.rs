//! Schema Snapshot Store
//!
//! Append-only, versioned history of schema models. Think of this as "git
//! commits" for the database schema: a stored snapshot is never rewritten,
//! and one of them is marked as the trusted baseline.

use crate::drift::DriftReport;
use crate::error::{EngineError, EngineResult};
use crate::schema::SchemaModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const BASELINE_FILE: &str = "baseline";
const REPORTS_DIR: &str = "reports";

/// Immutable capture of a schema model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub checksum: String,
    #[serde(flatten)]
    pub model: SchemaModel,
}

/// Metadata about a snapshot (lightweight, used for listing)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub version: u64,
    pub generated_at: DateTime<Utc>,
    pub checksum: String,
    pub table_count: usize,
    pub column_count: usize,
    pub index_count: usize,
    pub fk_count: usize,
    pub is_baseline: bool,
}

impl SnapshotMetadata {
    pub fn from_snapshot(snapshot: &Snapshot, baseline: Option<u64>) -> Self {
        Self {
            version: snapshot.version,
            generated_at: snapshot.generated_at,
            checksum: snapshot.checksum.clone(),
            table_count: snapshot.model.tables.len(),
            column_count: snapshot.model.column_count(),
            index_count: snapshot.model.index_count(),
            fk_count: snapshot.model.foreign_key_count(),
            is_baseline: baseline == Some(snapshot.version),
        }
    }
}

#[derive(Default)]
struct StoreState {
    snapshots: BTreeMap<u64, Snapshot>,
    baseline: Option<u64>,
}

/// Store for managing schema snapshots
///
/// With a directory every snapshot is also written as `v{version:06}.json`;
/// without one the history lives only in memory.
pub struct SnapshotStore {
    dir: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl SnapshotStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Open a directory-backed store, loading the existing history
    pub async fn open(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join(REPORTS_DIR)).await?;

        let mut state = StoreState::default();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_snapshot_file(&path) {
                continue;
            }
            match read_snapshot(&path).await {
                Ok(snapshot) => {
                    state.snapshots.insert(snapshot.version, snapshot);
                }
                Err(e) => warn!("⚠️  Ignoring snapshot {}: {}", path.display(), e),
            }
        }

        match tokio::fs::read_to_string(dir.join(BASELINE_FILE)).await {
            Ok(content) => {
                let version = content.trim().parse::<u64>().map_err(|_| {
                    EngineError::Internal(format!("corrupt baseline marker: {:?}", content.trim()))
                })?;
                state.baseline = Some(version);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            "Loaded {} snapshots from {} (baseline: {:?})",
            state.snapshots.len(),
            dir.display(),
            state.baseline
        );

        Ok(Self {
            dir: Some(dir),
            state: RwLock::new(state),
        })
    }

    /// Store a new snapshot, auto-incrementing version
    pub async fn save(&self, model: SchemaModel) -> EngineResult<Snapshot> {
        let model = model.canonicalize();
        let mut state = self.state.write().await;

        let mut version = state.snapshots.keys().next_back().copied().unwrap_or(0) + 1;
        let checksum = model.checksum();
        let snapshot = loop {
            let snapshot = Snapshot {
                version,
                generated_at: Utc::now(),
                checksum: checksum.clone(),
                model: model.clone(),
            };
            let Some(dir) = &self.dir else {
                break snapshot;
            };

            let path = snapshot_path(dir, version);
            match write_new(&path, &serde_json::to_vec_pretty(&snapshot)?).await {
                Ok(()) => break snapshot,
                // Left behind by a save that was interrupted before indexing
                Err(EngineError::Conflict(_)) => {
                    match read_snapshot(&path).await {
                        Ok(orphan) => {
                            warn!("Indexing orphaned snapshot v{}", version);
                            state.snapshots.insert(version, orphan);
                        }
                        Err(e) => warn!("⚠️  Skipping unreadable {}: {}", path.display(), e),
                    }
                    version += 1;
                }
                Err(e) => return Err(e),
            }
        };

        state.snapshots.insert(version, snapshot.clone());

        info!(
            "Saved snapshot v{}: {} tables, {} FKs",
            version,
            snapshot.model.tables.len(),
            snapshot.model.foreign_key_count()
        );

        Ok(snapshot)
    }

    /// Get the latest snapshot
    pub async fn get_latest(&self) -> Option<Snapshot> {
        let state = self.state.read().await;
        state.snapshots.values().next_back().cloned()
    }

    /// Get a specific version
    pub async fn get_version(&self, version: u64) -> Option<Snapshot> {
        self.state.read().await.snapshots.get(&version).cloned()
    }

    /// List all snapshots (metadata only), newest first
    pub async fn list(&self) -> Vec<SnapshotMetadata> {
        let state = self.state.read().await;
        state
            .snapshots
            .values()
            .rev()
            .map(|s| SnapshotMetadata::from_snapshot(s, state.baseline))
            .collect()
    }

    /// Set baseline snapshot (the trusted reference)
    pub async fn set_baseline(&self, version: u64) -> EngineResult<()> {
        let mut state = self.state.write().await;
        if !state.snapshots.contains_key(&version) {
            return Err(EngineError::NotFound(format!("Snapshot v{} not found", version)));
        }

        if let Some(dir) = &self.dir {
            tokio::fs::write(dir.join(BASELINE_FILE), version.to_string()).await?;
        }
        state.baseline = Some(version);

        info!("Set baseline to snapshot v{}", version);
        Ok(())
    }

    /// Get the baseline snapshot
    pub async fn get_baseline(&self) -> Option<Snapshot> {
        let state = self.state.read().await;
        let version = state.baseline?;
        state.snapshots.get(&version).cloned()
    }

    /// Compare two snapshots by version number
    pub async fn compare_versions(
        &self,
        from_version: u64,
        to_version: u64,
    ) -> EngineResult<(Snapshot, Snapshot)> {
        let from = self
            .get_version(from_version)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("Snapshot v{} not found", from_version)))?;

        let to = self
            .get_version(to_version)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("Snapshot v{} not found", to_version)))?;

        Ok((from, to))
    }

    /// Persist a drift report next to the snapshots it compares
    ///
    /// Returns the written path, or `None` for an in-memory store.
    pub async fn record_report(&self, report: &DriftReport) -> EngineResult<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let path = dir.join(REPORTS_DIR).join(format!(
            "drift_v{:06}_v{:06}.json",
            report.baseline_version, report.current_version
        ));
        tokio::fs::write(&path, serde_json::to_vec_pretty(report)?).await?;

        debug!("Recorded drift report at {}", path.display());
        Ok(Some(path))
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.len() > 6
        && name.starts_with('v')
        && name.ends_with(".json")
        && name[1..name.len() - 5].chars().all(|c| c.is_ascii_digit())
}

fn snapshot_path(dir: &Path, version: u64) -> PathBuf {
    dir.join(format!("v{:06}.json", version))
}

/// Parse a snapshot file and check its content against the stored checksum
async fn read_snapshot(path: &Path) -> EngineResult<Snapshot> {
    let content = tokio::fs::read_to_string(path).await?;
    let snapshot: Snapshot = serde_json::from_str(&content)?;

    let actual = snapshot.model.checksum();
    if actual != snapshot.checksum {
        return Err(EngineError::ChecksumMismatch {
            version: snapshot.version,
            expected: snapshot.checksum,
            actual,
        });
    }
    Ok(snapshot)
}

/// Write a file that must not exist yet
async fn write_new(path: &Path, content: &[u8]) -> EngineResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                EngineError::Conflict(format!("{} already exists", path.display()))
            }
            _ => e.into(),
        })?;
    file.write_all(content).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures::users;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_versions_auto_increment() {
        let store = SnapshotStore::in_memory();
        let first = store.save(SchemaModel::new(vec![users()])).await.unwrap();
        let second = store.save(SchemaModel::default()).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.get_latest().await.unwrap().version, 2);
        assert_eq!(store.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_baseline_requires_existing_snapshot() {
        let store = SnapshotStore::in_memory();
        assert!(matches!(
            store.set_baseline(1).await,
            Err(EngineError::NotFound(_))
        ));

        store.save(SchemaModel::new(vec![users()])).await.unwrap();
        store.set_baseline(1).await.unwrap();
        assert_eq!(store.get_baseline().await.unwrap().version, 1);
        assert!(store.list().await[0].is_baseline);
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SnapshotStore::open(dir.path()).await.unwrap();
            store.save(SchemaModel::new(vec![users()])).await.unwrap();
            store.save(SchemaModel::default()).await.unwrap();
            store.set_baseline(1).await.unwrap();
        }

        let reopened = SnapshotStore::open(dir.path()).await.unwrap();
        let baseline = reopened.get_baseline().await.unwrap();
        assert_eq!(baseline.version, 1);
        assert_eq!(baseline.model, SchemaModel::new(vec![users()]));
        assert!(dir.path().join("v000002.json").exists());

        let third = reopened.save(SchemaModel::default()).await.unwrap();
        assert_eq!(third.version, 3);
    }

    #[tokio::test]
    async fn test_tampered_snapshot_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SnapshotStore::open(dir.path()).await.unwrap();
            store.save(SchemaModel::new(vec![users()])).await.unwrap();
            store.save(SchemaModel::new(vec![users()])).await.unwrap();
        }

        // Edit v1 without fixing its checksum, truncate v2
        let path = dir.path().join("v000001.json");
        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        json["tables"][0]["name"] = "accounts".into();
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        std::fs::write(dir.path().join("v000002.json"), b"{\"version\": 2, \"gen").unwrap();

        let reopened = SnapshotStore::open(dir.path()).await.unwrap();
        assert!(reopened.get_version(1).await.is_none());
        assert!(reopened.list().await.is_empty());
        assert!(matches!(
            read_snapshot(&path).await,
            Err(EngineError::ChecksumMismatch { version: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_save_recovers_from_interrupted_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        store.save(SchemaModel::new(vec![users()])).await.unwrap();

        // A file for v2 exists on disk but never made it into the index
        let orphan = Snapshot {
            version: 2,
            generated_at: Utc::now(),
            checksum: SchemaModel::default().checksum(),
            model: SchemaModel::default(),
        };
        std::fs::write(
            dir.path().join("v000002.json"),
            serde_json::to_vec(&orphan).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("v000003.json"), b"{").unwrap();

        let saved = store.save(SchemaModel::new(vec![users()])).await.unwrap();
        assert_eq!(saved.version, 4);
        assert_eq!(store.get_version(2).await.unwrap().model, SchemaModel::default());
        assert!(dir.path().join("v000004.json").exists());
    }

    #[tokio::test]
    async fn test_snapshot_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).await.unwrap();
        store.save(SchemaModel::new(vec![users()])).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("v000001.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json["generatedAt"].is_string());
        assert_eq!(json["tables"][0]["name"], "users");
        assert_eq!(json["tables"][0]["columns"][0]["type"], "STRING(255)");
    }
}
