//! Drift Detector
//!
//! The "git diff" for schema snapshots. Set differences over tables, then
//! over columns, indexes and constraints of every shared table. All lookups
//! go through `BTreeMap`s and the final list is sorted, so the same two
//! snapshots always produce the same report.

use super::classify::{self, SubChange};
use super::{ChangeKind, DriftChange, DriftReport, EntityDefinition, EntityKind, Impact};
use crate::config::DriftConfig;
use crate::schema::{Column, Constraint, SchemaModel, Table};
use crate::snapshot::Snapshot;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct DriftDetector {
    config: DriftConfig,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    /// Compare a current snapshot against the baseline
    pub fn detect(&self, baseline: &Snapshot, current: &Snapshot) -> DriftReport {
        let changes = self.diff_models(&baseline.model, &current.model);

        debug!(
            "Drift v{} -> v{}: {} changes",
            baseline.version,
            current.version,
            changes.len()
        );

        DriftReport::new(baseline.version, current.version, changes)
    }

    /// Classified differences between two models, canonically ordered
    pub fn diff_models(&self, baseline: &SchemaModel, current: &SchemaModel) -> Vec<DriftChange> {
        let baseline = baseline.clone().canonicalize();
        let current = current.clone().canonicalize();

        let from: BTreeMap<&str, &Table> =
            baseline.tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let to: BTreeMap<&str, &Table> =
            current.tables.iter().map(|t| (t.name.as_str(), t)).collect();

        let mut changes = Vec::new();

        for (name, table) in &to {
            if !from.contains_key(name) {
                changes.push(table_added(table, &current));
            }
        }

        for (name, table) in &from {
            if !to.contains_key(name) {
                changes.push(DriftChange {
                    kind: ChangeKind::Removed,
                    entity: EntityKind::Table,
                    table: table.name.clone(),
                    path: table.name.clone(),
                    impact: Impact::Breaking,
                    detail: format!(
                        "Table {} dropped ({} columns, all data lost)",
                        table.name,
                        table.columns.len()
                    ),
                    before: Some(EntityDefinition::Table((*table).clone())),
                    after: None,
                });
            }
        }

        for (name, before) in &from {
            if let Some(after) = to.get(name) {
                self.diff_columns(before, after, &mut changes);
                diff_indexes(before, after, &mut changes);
                diff_constraints(before, after, &current, &mut changes);
            }
        }

        changes.sort_by(|a, b| {
            (&a.table, a.entity, &a.path, a.kind).cmp(&(&b.table, b.entity, &b.path, b.kind))
        });
        changes
    }

    fn diff_columns(&self, before: &Table, after: &Table, changes: &mut Vec<DriftChange>) {
        let from: BTreeMap<&str, &Column> =
            before.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let to: BTreeMap<&str, &Column> =
            after.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        let added: Vec<&Column> = to
            .iter()
            .filter(|(name, _)| !from.contains_key(*name))
            .map(|(_, c)| *c)
            .collect();
        let removed: Vec<&Column> = from
            .iter()
            .filter(|(name, _)| !to.contains_key(*name))
            .map(|(_, c)| *c)
            .collect();

        for column in &added {
            let impact = classify::column_added(column);
            let detail = if impact == Impact::Breaking {
                format!("Column {} added as NOT NULL without a default", column.name)
            } else {
                format!("Column {} added ({})", column.name, column.data_type)
            };
            changes.push(DriftChange {
                kind: ChangeKind::Added,
                entity: EntityKind::Column,
                table: after.name.clone(),
                path: format!("{}.{}", after.name, column.name),
                impact,
                detail,
                before: None,
                after: Some(EntityDefinition::Column((*column).clone())),
            });
        }

        for column in &removed {
            changes.push(DriftChange {
                kind: ChangeKind::Removed,
                entity: EntityKind::Column,
                table: before.name.clone(),
                path: format!("{}.{}", before.name, column.name),
                impact: Impact::Breaking,
                detail: format!("Column {} removed (data lost)", column.name),
                before: Some(EntityDefinition::Column((*column).clone())),
                after: None,
            });
        }

        let shared: Vec<&str> = from.keys().filter(|n| to.contains_key(*n)).copied().collect();
        let rank_before = ordinal_ranks(&shared, &from);
        let rank_after = ordinal_ranks(&shared, &to);

        for name in &shared {
            let (old, new) = (from[name], to[name]);
            let mut sub_changes = classify::column_sub_changes(old, new);

            if rank_before.get(name) != rank_after.get(name) {
                sub_changes.push(SubChange {
                    impact: Impact::Informational,
                    description: format!("position {} -> {}", old.ordinal, new.ordinal),
                });
            }

            if let Some(impact) = sub_changes.iter().map(|s| s.impact).max() {
                let detail = sub_changes
                    .iter()
                    .map(|s| s.description.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                changes.push(DriftChange {
                    kind: ChangeKind::Modified,
                    entity: EntityKind::Column,
                    table: after.name.clone(),
                    path: format!("{}.{}", after.name, name),
                    impact,
                    detail: format!("Column {} changed: {}", name, detail),
                    before: Some(EntityDefinition::Column(old.clone())),
                    after: Some(EntityDefinition::Column(new.clone())),
                });
            }
        }

        if self.config.detect_renames {
            rename_candidates(after, &removed, &added, changes);
        }
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

fn table_added(table: &Table, current: &SchemaModel) -> DriftChange {
    let dangling = dangling_foreign_keys(table, current);
    let (impact, detail) = if dangling.is_empty() {
        (
            Impact::NonBreaking,
            format!("Table {} created with {} columns", table.name, table.columns.len()),
        )
    } else {
        (
            Impact::Breaking,
            format!(
                "Table {} created with foreign keys to missing targets: {}",
                table.name,
                dangling.join(", ")
            ),
        )
    };

    DriftChange {
        kind: ChangeKind::Added,
        entity: EntityKind::Table,
        table: table.name.clone(),
        path: table.name.clone(),
        impact,
        detail,
        before: None,
        after: Some(EntityDefinition::Table(table.clone())),
    }
}

/// Rank of each shared column when ordered by ordinal
///
/// Comparing ranks instead of raw ordinals keeps an unrelated add or drop
/// from marking every later column as moved.
fn ordinal_ranks<'a>(shared: &[&'a str], columns: &BTreeMap<&str, &Column>) -> BTreeMap<&'a str, usize> {
    let mut ordered: Vec<(&'a str, i32)> = shared
        .iter()
        .map(|name| (*name, columns[name].ordinal))
        .collect();
    ordered.sort_by_key(|(name, ordinal)| (*ordinal, *name));
    ordered
        .into_iter()
        .enumerate()
        .map(|(rank, (name, _))| (name, rank))
        .collect()
}

/// Removed/added pairs with the same type and ordinals at most one apart
fn rename_candidates(
    table: &Table,
    removed: &[&Column],
    added: &[&Column],
    changes: &mut Vec<DriftChange>,
) {
    let mut claimed = BTreeSet::new();

    for old in removed {
        let candidate = added.iter().find(|new| {
            !claimed.contains(new.name.as_str())
                && new.data_type == old.data_type
                && (new.ordinal - old.ordinal).abs() <= 1
        });

        if let Some(new) = candidate {
            claimed.insert(new.name.as_str());
            changes.push(DriftChange {
                kind: ChangeKind::Modified,
                entity: EntityKind::Column,
                table: table.name.clone(),
                path: format!("{}.{}->{}", table.name, old.name, new.name),
                impact: Impact::Informational,
                detail: format!(
                    "Column {} may have been renamed to {} (same type {}, adjacent position)",
                    old.name, new.name, new.data_type
                ),
                before: Some(EntityDefinition::Column((*old).clone())),
                after: Some(EntityDefinition::Column((*new).clone())),
            });
        }
    }
}

fn diff_indexes(before: &Table, after: &Table, changes: &mut Vec<DriftChange>) {
    let from: BTreeMap<&str, _> = before.indexes.iter().map(|i| (i.name.as_str(), i)).collect();
    let to: BTreeMap<&str, _> = after.indexes.iter().map(|i| (i.name.as_str(), i)).collect();

    for (name, index) in &to {
        let path = format!("{}.index.{}", after.name, name);
        match from.get(name) {
            None => changes.push(DriftChange {
                kind: ChangeKind::Added,
                entity: EntityKind::Index,
                table: after.name.clone(),
                path,
                impact: classify::index_added(index),
                detail: format!(
                    "{} {} created on ({})",
                    if index.unique { "Unique index" } else { "Index" },
                    name,
                    index.columns.join(", ")
                ),
                before: None,
                after: Some(EntityDefinition::Index((*index).clone())),
            }),
            Some(old) if old != index => changes.push(DriftChange {
                kind: ChangeKind::Modified,
                entity: EntityKind::Index,
                table: after.name.clone(),
                path,
                impact: classify::index_modified(old, index),
                detail: format!(
                    "Index {} changed: ({}){} -> ({}){}",
                    name,
                    old.columns.join(", "),
                    if old.unique { " unique" } else { "" },
                    index.columns.join(", "),
                    if index.unique { " unique" } else { "" }
                ),
                before: Some(EntityDefinition::Index((*old).clone())),
                after: Some(EntityDefinition::Index((*index).clone())),
            }),
            Some(_) => {}
        }
    }

    for (name, index) in &from {
        if !to.contains_key(name) {
            changes.push(DriftChange {
                kind: ChangeKind::Removed,
                entity: EntityKind::Index,
                table: before.name.clone(),
                path: format!("{}.index.{}", before.name, name),
                impact: classify::index_removed(index),
                detail: format!("Index {} dropped", name),
                before: Some(EntityDefinition::Index((*index).clone())),
                after: None,
            });
        }
    }
}

fn diff_constraints(
    before: &Table,
    after: &Table,
    current: &SchemaModel,
    changes: &mut Vec<DriftChange>,
) {
    let from: BTreeMap<&str, &Constraint> =
        before.constraints.iter().map(|c| (c.name(), c)).collect();
    let to: BTreeMap<&str, &Constraint> =
        after.constraints.iter().map(|c| (c.name(), c)).collect();

    for (name, constraint) in &to {
        let path = format!("{}.constraint.{}", after.name, name);
        let dangling = dangling_target(constraint, current);

        let change = match from.get(name) {
            None => {
                let mut detail = format!("{} constraint {} added", capitalize(constraint.label()), name);
                if let Some(missing) = &dangling {
                    detail.push_str(&format!(" referencing missing {}", missing));
                }
                Some((ChangeKind::Added, classify::constraint_added(constraint), detail, None))
            }
            Some(old) if old != constraint => Some((
                ChangeKind::Modified,
                classify::constraint_modified(old, constraint),
                format!("{} constraint {} redefined", capitalize(constraint.label()), name),
                Some(EntityDefinition::Constraint((*old).clone())),
            )),
            Some(old) => dangling.map(|missing| {
                (
                    ChangeKind::Modified,
                    Impact::Breaking,
                    format!("Foreign key {} now references missing {}", name, missing),
                    Some(EntityDefinition::Constraint((*old).clone())),
                )
            }),
        };

        if let Some((kind, impact, detail, before_def)) = change {
            changes.push(DriftChange {
                kind,
                entity: EntityKind::Constraint,
                table: after.name.clone(),
                path,
                impact,
                detail,
                before: before_def,
                after: Some(EntityDefinition::Constraint((*constraint).clone())),
            });
        }
    }

    for (name, constraint) in &from {
        if !to.contains_key(name) {
            changes.push(DriftChange {
                kind: ChangeKind::Removed,
                entity: EntityKind::Constraint,
                table: before.name.clone(),
                path: format!("{}.constraint.{}", before.name, name),
                impact: classify::constraint_removed(constraint),
                detail: format!("{} constraint {} dropped", capitalize(constraint.label()), name),
                before: Some(EntityDefinition::Constraint((*constraint).clone())),
                after: None,
            });
        }
    }
}

/// `table.column` a foreign key points at, when it is absent from `model`
fn dangling_target(constraint: &Constraint, model: &SchemaModel) -> Option<String> {
    let Constraint::ForeignKey { references, .. } = constraint else {
        return None;
    };

    let Some(table) = model.table(&references.table) else {
        return Some(references.table.clone());
    };

    references
        .columns
        .iter()
        .find(|column| table.column(column).is_none())
        .map(|column| format!("{}.{}", references.table, column))
}

fn dangling_foreign_keys(table: &Table, model: &SchemaModel) -> Vec<String> {
    table
        .foreign_keys()
        .filter_map(|fk| dangling_target(fk, model))
        .collect()
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
