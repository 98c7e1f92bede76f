//! Migration ledger
//!
//! The durable record of what has been applied. Entries are created on apply
//! and only ever change status afterwards.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a migration
///
/// ```text
/// PENDING -> APPLYING -> COMPLETED -> ROLLING_BACK -> ROLLED_BACK
///                     \-> FAILED -> APPLYING (explicit retry only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Pending,
    Applying,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::Applying => "APPLYING",
            MigrationStatus::Completed => "COMPLETED",
            MigrationStatus::Failed => "FAILED",
            MigrationStatus::RollingBack => "ROLLING_BACK",
            MigrationStatus::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Applying, Completed)
                | (Applying, Failed)
                | (Failed, Applying)
                | (Completed, RollingBack)
                | (RollingBack, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::RolledBack)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(MigrationStatus::Pending),
            "APPLYING" => Ok(MigrationStatus::Applying),
            "COMPLETED" => Ok(MigrationStatus::Completed),
            "FAILED" => Ok(MigrationStatus::Failed),
            "ROLLING_BACK" => Ok(MigrationStatus::RollingBack),
            "ROLLED_BACK" => Ok(MigrationStatus::RolledBack),
            other => Err(EngineError::Internal(format!("unknown migration status: {}", other))),
        }
    }
}

/// One row of the `_migrations` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub version: u64,
    pub name: String,
    pub checksum: String,
    pub status: MigrationStatus,
    pub applied_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// Copy of this record moved to `next`, if the lifecycle allows it
    pub fn transition(&self, next: MigrationStatus) -> EngineResult<MigrationRecord> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                version: self.version,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(MigrationRecord {
            status: next,
            ..self.clone()
        })
    }
}

/// Snapshot of the ledger read at one point in time
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: BTreeMap<u64, MigrationRecord>,
}

impl Ledger {
    pub fn from_records(records: impl IntoIterator<Item = MigrationRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.version, r)).collect(),
        }
    }

    pub fn get(&self, version: u64) -> Option<&MigrationRecord> {
        self.records.get(&version)
    }

    /// All records, version ascending
    pub fn records(&self) -> impl Iterator<Item = &MigrationRecord> {
        self.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// COMPLETED records ordered by when they were applied
    pub fn completed_by_application_time(&self) -> Vec<&MigrationRecord> {
        let mut completed: Vec<&MigrationRecord> = self
            .records
            .values()
            .filter(|r| r.status == MigrationStatus::Completed)
            .collect();
        completed.sort_by_key(|r| (r.applied_at, r.version));
        completed
    }

    pub fn max_completed_version(&self) -> Option<u64> {
        self.records
            .values()
            .filter(|r| r.status == MigrationStatus::Completed)
            .map(|r| r.version)
            .max()
    }

    /// Application timestamp strictly after every recorded one
    ///
    /// Truncated to microseconds, the precision the ledger column stores.
    pub fn next_applied_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(6);
        match self.records.values().map(|r| r.applied_at).max() {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        }
    }
}
