//! Migration Generator
//!
//! Turns a drift report into one ordered, reversible migration. Operations
//! are grouped into phases so that nothing is dropped while something still
//! depends on it and nothing is created before what it references:
//!
//! 1. drop foreign keys, other constraints, indexes, columns
//! 2. drop tables (dependents before referents)
//! 3. create tables (referents before dependents, without foreign keys)
//! 4. add columns, alter columns, create indexes, add constraints
//! 5. add foreign keys
//!
//! `down` is the inverse of every `up` operation, in reverse order.

use super::operation::Operation;
use super::Migration;
use crate::drift::{ChangeKind, DriftDetector, DriftReport, EntityDefinition, EntityKind};
use crate::schema::{Column, SchemaModel, Table};
use chrono::Utc;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Default)]
struct Plan {
    drop_foreign_keys: Vec<Operation>,
    drop_constraints: Vec<Operation>,
    drop_indexes: Vec<Operation>,
    drop_columns: Vec<Operation>,
    drop_tables: Vec<Table>,
    create_tables: Vec<Table>,
    add_columns: Vec<Operation>,
    alter_columns: Vec<Operation>,
    create_indexes: Vec<Operation>,
    add_constraints: Vec<Operation>,
    add_foreign_keys: Vec<Operation>,
}

impl Plan {
    fn into_operations(self) -> Vec<Operation> {
        let mut ops = Vec::new();
        ops.extend(self.drop_foreign_keys);
        ops.extend(self.drop_constraints);
        ops.extend(self.drop_indexes);
        ops.extend(self.drop_columns);
        ops.extend(
            dependency_order(&self.drop_tables)
                .into_iter()
                .rev()
                .map(|table| Operation::DropTable {
                    table: table.without_foreign_keys(),
                }),
        );
        ops.extend(
            dependency_order(&self.create_tables)
                .into_iter()
                .map(|table| Operation::CreateTable { table }),
        );
        ops.extend(self.add_columns);
        ops.extend(self.alter_columns);
        ops.extend(self.create_indexes);
        ops.extend(self.add_constraints);
        ops.extend(self.add_foreign_keys);
        ops
    }

    fn add_table(&mut self, table: &Table) {
        for fk in table.foreign_keys() {
            self.add_foreign_keys.push(Operation::AddConstraint {
                table: table.name.clone(),
                constraint: fk.clone(),
            });
        }
        self.create_tables.push(table.without_foreign_keys());
    }

    fn drop_table(&mut self, table: &Table) {
        for fk in table.foreign_keys() {
            self.drop_foreign_keys.push(Operation::DropConstraint {
                table: table.name.clone(),
                constraint: fk.clone(),
            });
        }
        self.drop_tables.push(table.clone());
    }

    fn alter_column(&mut self, table: &str, from: &Column, to: &Column) {
        // Rename hints and pure position shifts have nothing to apply
        if from.name != to.name {
            return;
        }
        if from.data_type == to.data_type && from.nullable == to.nullable && from.default == to.default {
            return;
        }
        self.alter_columns.push(Operation::AlterColumn {
            table: table.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
    }
}

pub struct MigrationGenerator;

impl MigrationGenerator {
    /// One migration for a report, or none when nothing is actionable
    pub fn generate_from_drift(report: &DriftReport) -> Vec<Migration> {
        Self::generate_from_drift_at(report, timestamp_version())
    }

    pub fn generate_from_drift_at(report: &DriftReport, version: u64) -> Vec<Migration> {
        let name = format!("drift_v{}_to_v{}", report.baseline_version, report.current_version);
        Self::build(report, version, &name).into_iter().collect()
    }

    /// Migration that moves `current` to `target`
    pub fn generate_from_desired_state(current: &SchemaModel, target: &SchemaModel) -> Vec<Migration> {
        Self::generate_from_desired_state_at(current, target, timestamp_version())
    }

    pub fn generate_from_desired_state_at(
        current: &SchemaModel,
        target: &SchemaModel,
        version: u64,
    ) -> Vec<Migration> {
        let changes = DriftDetector::default().diff_models(current, target);
        let report = DriftReport::new(0, 0, changes);
        Self::build(&report, version, "desired_state").into_iter().collect()
    }

    /// Hand-authoring template with no operations
    pub fn generate_empty(name: &str) -> Migration {
        Self::generate_empty_at(name, timestamp_version())
    }

    pub fn generate_empty_at(name: &str, version: u64) -> Migration {
        Migration::new(version, slugify(name), Vec::new(), Vec::new())
    }

    fn build(report: &DriftReport, version: u64, name: &str) -> Option<Migration> {
        let mut plan = Plan::default();

        for change in &report.changes {
            let table = change.table.as_str();
            match (change.entity, change.kind, &change.before, &change.after) {
                (EntityKind::Table, ChangeKind::Added, _, Some(EntityDefinition::Table(t))) => {
                    plan.add_table(t)
                }
                (EntityKind::Table, ChangeKind::Removed, Some(EntityDefinition::Table(t)), _) => {
                    plan.drop_table(t)
                }
                (EntityKind::Column, ChangeKind::Added, _, Some(EntityDefinition::Column(c))) => {
                    plan.add_columns.push(Operation::AddColumn {
                        table: table.to_string(),
                        column: c.clone(),
                    })
                }
                (EntityKind::Column, ChangeKind::Removed, Some(EntityDefinition::Column(c)), _) => {
                    plan.drop_columns.push(Operation::DropColumn {
                        table: table.to_string(),
                        column: c.clone(),
                    })
                }
                (
                    EntityKind::Column,
                    ChangeKind::Modified,
                    Some(EntityDefinition::Column(from)),
                    Some(EntityDefinition::Column(to)),
                ) => plan.alter_column(table, from, to),
                (EntityKind::Index, _, before, after) => {
                    if let Some(EntityDefinition::Index(old)) = before {
                        plan.drop_indexes.push(Operation::DropIndex {
                            table: table.to_string(),
                            index: old.clone(),
                        });
                    }
                    if let Some(EntityDefinition::Index(new)) = after {
                        plan.create_indexes.push(Operation::CreateIndex {
                            table: table.to_string(),
                            index: new.clone(),
                        });
                    }
                }
                (EntityKind::Constraint, _, before, after) => {
                    let (Some(EntityDefinition::Constraint(old)), Some(EntityDefinition::Constraint(new))) =
                        (before, after)
                    else {
                        if let Some(EntityDefinition::Constraint(old)) = before {
                            let op = Operation::DropConstraint {
                                table: table.to_string(),
                                constraint: old.clone(),
                            };
                            if old.is_foreign_key() {
                                plan.drop_foreign_keys.push(op);
                            } else {
                                plan.drop_constraints.push(op);
                            }
                        }
                        if let Some(EntityDefinition::Constraint(new)) = after {
                            let op = Operation::AddConstraint {
                                table: table.to_string(),
                                constraint: new.clone(),
                            };
                            if new.is_foreign_key() {
                                plan.add_foreign_keys.push(op);
                            } else {
                                plan.add_constraints.push(op);
                            }
                        }
                        continue;
                    };

                    // Unchanged definition flagged for a missing target
                    if old == new {
                        continue;
                    }

                    let drop = Operation::DropConstraint {
                        table: table.to_string(),
                        constraint: old.clone(),
                    };
                    let add = Operation::AddConstraint {
                        table: table.to_string(),
                        constraint: new.clone(),
                    };
                    if old.is_foreign_key() {
                        plan.drop_foreign_keys.push(drop);
                    } else {
                        plan.drop_constraints.push(drop);
                    }
                    if new.is_foreign_key() {
                        plan.add_foreign_keys.push(add);
                    } else {
                        plan.add_constraints.push(add);
                    }
                }
                _ => {
                    warn!("Skipping drift change without a usable definition: {}", change.path);
                }
            }
        }

        let up = plan.into_operations();
        if up.is_empty() {
            debug!("No actionable changes in drift report");
            return None;
        }

        let down: Vec<Operation> = up.iter().rev().filter_map(Operation::inverse).collect();
        let migration = Migration::new(version, name, up, down);

        debug!(
            "Generated migration {} with {} operations",
            migration.file_stem(),
            migration.up.len()
        );
        Some(migration)
    }
}

/// Tables ordered so every referenced table precedes the tables that
/// reference it. Only edges between the given tables count.
///
/// Nodes and edges are inserted alphabetically, which makes the sort
/// deterministic. A cycle falls back to plain alphabetical order; foreign
/// keys are added after all tables exist, so that order is still valid.
fn dependency_order(tables: &[Table]) -> Vec<Table> {
    let by_name: BTreeMap<&str, &Table> = tables.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: BTreeMap<&str, NodeIndex> = by_name
        .keys()
        .map(|name| (*name, graph.add_node(*name)))
        .collect();

    for (name, table) in &by_name {
        let mut referenced: Vec<&str> = table
            .foreign_keys()
            .filter_map(|fk| fk.referenced_table())
            .filter(|target| target != name)
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        for target in referenced {
            if let Some(&from) = nodes.get(target) {
                // referent -> dependent
                graph.add_edge(from, nodes[name], ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order
            .into_iter()
            .map(|idx| by_name[graph[idx]].clone())
            .collect(),
        Err(cycle) => {
            warn!(
                "Foreign key cycle through table {}, using alphabetical order",
                graph[cycle.node_id()]
            );
            by_name.values().map(|t| (*t).clone()).collect()
        }
    }
}

/// Current UTC time as `YYYYMMDDHHMMSS`
pub fn timestamp_version() -> u64 {
    Utc::now()
        .format("%Y%m%d%H%M%S")
        .to_string()
        .parse()
        .unwrap_or_default()
}

/// Lowercase, underscores, alphanumerics only
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "migration".to_string()
    } else {
        slug
    }
}
