//! Drift detection
//!
//! Compares two schema models and classifies every structural difference by
//! how dangerous it is for code and data that depend on the baseline.

pub mod classify;
pub mod detector;

pub use detector::DriftDetector;

use crate::schema::{Column, Constraint, Index, Table};
use serde::{Deserialize, Serialize};

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// Kind of schema object a change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Table,
    Column,
    Index,
    Constraint,
}

/// Risk classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Impact {
    Informational,
    NonBreaking,
    Breaking,
}

/// Entity state carried on a change so it can be acted on later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityDefinition {
    Table(Table),
    Column(Column),
    Index(Index),
    Constraint(Constraint),
}

/// A single classified difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftChange {
    pub kind: ChangeKind,
    pub entity: EntityKind,
    /// Owning table
    pub table: String,
    /// Dotted path (e.g. "users.email", "users.index.users_email_idx")
    pub path: String,
    pub impact: Impact,
    /// Human-readable description
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<EntityDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<EntityDefinition>,
}

/// Counts per kind and impact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub breaking: usize,
    pub non_breaking: usize,
    pub informational: usize,
}

impl DriftSummary {
    pub fn from_changes(changes: &[DriftChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.kind {
                ChangeKind::Added => summary.added += 1,
                ChangeKind::Removed => summary.removed += 1,
                ChangeKind::Modified => summary.modified += 1,
            }
            match change.impact {
                Impact::Breaking => summary.breaking += 1,
                Impact::NonBreaking => summary.non_breaking += 1,
                Impact::Informational => summary.informational += 1,
            }
        }
        summary
    }
}

/// Result of comparing two snapshots
///
/// Contains no timestamps: two runs over the same snapshots serialize to the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub baseline_version: u64,
    pub current_version: u64,
    pub changes: Vec<DriftChange>,
    pub has_drift: bool,
    pub summary: DriftSummary,
}

impl DriftReport {
    pub fn new(baseline_version: u64, current_version: u64, changes: Vec<DriftChange>) -> Self {
        Self {
            baseline_version,
            current_version,
            has_drift: !changes.is_empty(),
            summary: DriftSummary::from_changes(&changes),
            changes,
        }
    }

    pub fn max_impact(&self) -> Option<Impact> {
        self.changes.iter().map(|c| c.impact).max()
    }

    pub fn has_breaking_changes(&self) -> bool {
        self.max_impact() == Some(Impact::Breaking)
    }
}
