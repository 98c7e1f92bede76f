//! Migrations
//!
//! Generation, on-disk storage, the durable ledger and the manager that
//! applies and rolls back migrations under the advisory lock.

pub mod file;
pub mod generator;
pub mod ledger;
pub mod manager;
pub mod memory;
pub mod operation;
pub mod postgres;
pub mod repository;
pub mod target;

pub use generator::MigrationGenerator;
pub use ledger::{MigrationRecord, MigrationStatus};
pub use manager::{MigrationManager, MigrationStatusEntry, RollbackReport, RunOptions, RunReport};
pub use memory::InMemoryTarget;
pub use operation::Operation;
pub use postgres::PostgresTarget;
pub use repository::MigrationRepository;
pub use target::{MigrationSession, MigrationTarget, TransactionPlan};

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A versioned, checksummed pair of operation lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub checksum: String,
    pub up: Vec<Operation>,
    #[serde(default)]
    pub down: Vec<Operation>,
}

impl Migration {
    /// Build a migration, fixing its checksum from the operation lists
    pub fn new(version: u64, name: impl Into<String>, up: Vec<Operation>, down: Vec<Operation>) -> Self {
        let checksum = Self::compute_checksum(&up, &down);
        Self {
            version,
            name: name.into(),
            checksum,
            up,
            down,
        }
    }

    /// SHA-256 over the serialized `up` and `down` lists
    pub fn compute_checksum(up: &[Operation], down: &[Operation]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(up).unwrap_or_default());
        hasher.update(b"\n--down--\n");
        hasher.update(serde_json::to_vec(down).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    /// Recompute the checksum from current content and compare
    pub fn verify(&self) -> EngineResult<()> {
        let actual = Self::compute_checksum(&self.up, &self.down);
        if actual != self.checksum {
            return Err(EngineError::ChecksumMismatch {
                version: self.version,
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn is_reversible(&self) -> bool {
        !self.down.is_empty()
    }

    /// `{version}_{name}`, the file name without extension
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures::users;

    #[test]
    fn test_checksum_detects_edits() {
        let up = vec![Operation::CreateTable { table: users() }];
        let down = vec![Operation::DropTable { table: users() }];
        let mut migration = Migration::new(1, "create_users", up, down);
        assert!(migration.verify().is_ok());

        migration.down.clear();
        assert!(matches!(
            migration.verify(),
            Err(EngineError::ChecksumMismatch { version: 1, .. })
        ));
    }

    #[test]
    fn test_checksum_depends_on_list_boundaries() {
        let op = Operation::RawSql { sql: "SELECT 1".into() };
        let a = Migration::compute_checksum(&[op.clone()], &[]);
        let b = Migration::compute_checksum(&[], &[op]);
        assert_ne!(a, b);
    }
}
