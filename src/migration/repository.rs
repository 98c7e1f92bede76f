//! Migration repository
//!
//! The set of registered migrations, keyed by version. Backed by
//! `migrations_dir` when opened on a directory, otherwise purely in memory.

use super::file::{list_migration_files, read_migration, write_migration, FileFormat};
use super::Migration;
use crate::error::{EngineError, EngineResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Registered {
    migration: Migration,
    path: Option<PathBuf>,
}

pub struct MigrationRepository {
    dir: Option<PathBuf>,
    entries: RwLock<BTreeMap<u64, Registered>>,
}

impl Default for MigrationRepository {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MigrationRepository {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load every migration file in `dir`, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries: BTreeMap<u64, Registered> = BTreeMap::new();
        for path in list_migration_files(&dir).await? {
            let migration = read_migration(&path).await?;
            debug!("Loaded migration {} from {}", migration.version, path.display());
            if let Some(existing) = entries.get(&migration.version) {
                return Err(EngineError::Conflict(format!(
                    "migration version {} defined twice: {} and {}",
                    migration.version,
                    existing.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                    path.display()
                )));
            }
            entries.insert(
                migration.version,
                Registered {
                    migration,
                    path: Some(path),
                },
            );
        }

        info!("📂 Loaded {} migrations from {}", entries.len(), dir.display());

        Ok(Self {
            dir: Some(dir),
            entries: RwLock::new(entries),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Register a migration without persisting it
    pub async fn register(&self, migration: Migration) -> EngineResult<()> {
        migration.verify()?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&migration.version) {
            return Err(EngineError::Conflict(format!(
                "migration version {} is already registered",
                migration.version
            )));
        }
        entries.insert(
            migration.version,
            Registered {
                migration,
                path: None,
            },
        );
        Ok(())
    }

    /// Persist a migration (when directory-backed) and register it
    pub async fn write(&self, migration: Migration, format: FileFormat) -> EngineResult<Option<PathBuf>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&migration.version) {
            return Err(EngineError::Conflict(format!(
                "migration version {} is already registered",
                migration.version
            )));
        }

        let path = match &self.dir {
            Some(dir) => Some(write_migration(dir, &migration, format).await?),
            None => None,
        };
        if let Some(path) = &path {
            info!("📝 Wrote migration {}", path.display());
        }

        entries.insert(
            migration.version,
            Registered {
                migration,
                path: path.clone(),
            },
        );
        Ok(path)
    }

    /// All registered migrations, version ascending
    pub async fn all(&self) -> Vec<Migration> {
        self.entries
            .read()
            .await
            .values()
            .map(|r| r.migration.clone())
            .collect()
    }

    pub async fn get(&self, version: u64) -> Option<Migration> {
        self.entries.read().await.get(&version).map(|r| r.migration.clone())
    }

    pub async fn path(&self, version: u64) -> Option<PathBuf> {
        self.entries.read().await.get(&version).and_then(|r| r.path.clone())
    }

    pub async fn contains(&self, version: u64) -> bool {
        self.entries.read().await.contains_key(&version)
    }

    /// The migration as it is now, hashed from freshly read content
    ///
    /// File-backed migrations are re-read from disk and must still match the
    /// checksum they were registered with.
    pub async fn fresh(&self, version: u64) -> EngineResult<Migration> {
        let registered = self
            .entries
            .read()
            .await
            .get(&version)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("migration {} is not registered", version)))?;

        let current = match &registered.path {
            Some(path) => read_migration(path).await?,
            None => {
                registered.migration.verify()?;
                registered.migration.clone()
            }
        };

        if current.checksum != registered.migration.checksum {
            return Err(EngineError::ChecksumMismatch {
                version,
                expected: registered.migration.checksum,
                actual: current.checksum,
            });
        }

        Ok(current)
    }
}
