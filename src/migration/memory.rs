//! In-memory migration target
//!
//! Applies operations to a `SchemaModel` held in memory, with the same ledger
//! and advisory lock semantics as the PostgreSQL target. Backs the static
//! definition mode and the scenario tests.

use super::ledger::{Ledger, MigrationRecord};
use super::operation::Operation;
use super::target::{MigrationSession, MigrationTarget, TransactionPlan};
use crate::error::{EngineError, EngineResult};
use crate::schema::{Analysis, Constraint, SchemaModel, SchemaProvider, Table};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    model: SchemaModel,
    ledger: BTreeMap<u64, MigrationRecord>,
    ledger_ready: bool,
}

/// Shared in-memory database; clones see the same state
#[derive(Clone, Default)]
pub struct InMemoryTarget {
    state: Arc<Mutex<MemoryState>>,
    /// lock key -> owning session id
    locks: Arc<Mutex<HashMap<i64, u64>>>,
    sessions: Arc<AtomicU64>,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: SchemaModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                model: model.canonicalize(),
                ..MemoryState::default()
            })),
            ..Self::default()
        }
    }

    /// Current schema
    pub async fn model(&self) -> SchemaModel {
        self.state.lock().await.model.clone()
    }

    /// Replace the schema outside of any migration (simulates manual drift)
    pub async fn set_model(&self, model: SchemaModel) {
        self.state.lock().await.model = model.canonicalize();
    }

    pub async fn ledger_records(&self) -> Vec<MigrationRecord> {
        self.state.lock().await.ledger.values().cloned().collect()
    }
}

#[async_trait]
impl MigrationTarget for InMemoryTarget {
    async fn session(&self) -> EngineResult<Box<dyn MigrationSession>> {
        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MemorySession {
            id,
            target: self.clone(),
        }))
    }
}

#[async_trait]
impl SchemaProvider for InMemoryTarget {
    async fn analyze(&self) -> EngineResult<Analysis> {
        Ok(Analysis {
            model: self.model().await,
            warnings: Vec::new(),
        })
    }
}

struct MemorySession {
    id: u64,
    target: InMemoryTarget,
}

#[async_trait]
impl MigrationSession for MemorySession {
    async fn ensure_ledger(&mut self) -> EngineResult<()> {
        self.target.state.lock().await.ledger_ready = true;
        Ok(())
    }

    async fn try_lock(&mut self, key: i64) -> EngineResult<bool> {
        let mut locks = self.target.locks.lock().await;
        match locks.get(&key) {
            Some(owner) => Ok(*owner == self.id),
            None => {
                locks.insert(key, self.id);
                Ok(true)
            }
        }
    }

    async fn unlock(&mut self, key: i64) -> EngineResult<()> {
        let mut locks = self.target.locks.lock().await;
        if locks.get(&key) == Some(&self.id) {
            locks.remove(&key);
        }
        Ok(())
    }

    async fn ledger(&mut self) -> EngineResult<Ledger> {
        let state = self.target.state.lock().await;
        Ok(Ledger::from_records(state.ledger.values().cloned()))
    }

    async fn execute(&mut self, plan: &TransactionPlan) -> EngineResult<()> {
        let mut state = self.target.state.lock().await;
        if !state.ledger_ready {
            return Err(EngineError::Execution("ledger table does not exist".to_string()));
        }

        // Work on a copy; nothing is visible unless every step succeeds
        let model = apply_operations(state.model.clone(), &plan.operations)?;
        state.model = model;
        state.ledger.insert(plan.after.version, plan.after.clone());
        Ok(())
    }

    async fn record(&mut self, record: &MigrationRecord) -> EngineResult<()> {
        let mut state = self.target.state.lock().await;
        if !state.ledger_ready {
            return Err(EngineError::Execution("ledger table does not exist".to_string()));
        }
        state.ledger.insert(record.version, record.clone());
        Ok(())
    }
}

/// Apply operations in order, returning the resulting canonical model
pub fn apply_operations(mut model: SchemaModel, operations: &[Operation]) -> EngineResult<SchemaModel> {
    for operation in operations {
        apply_operation(&mut model, operation)
            .map_err(|reason| EngineError::Execution(format!("{}: {}", operation.describe(), reason)))?;
    }
    Ok(model.canonicalize())
}

fn apply_operation(model: &mut SchemaModel, operation: &Operation) -> Result<(), String> {
    match operation {
        Operation::CreateTable { table } => {
            if model.table(&table.name).is_some() {
                return Err(format!("relation \"{}\" already exists", table.name));
            }
            // Foreign keys arrive as separate AddConstraint steps, as in the SQL rendering
            model.tables.push(table.without_foreign_keys());
        }
        Operation::DropTable { table } => {
            let referenced_by = model
                .tables
                .iter()
                .filter(|t| t.name != table.name)
                .flat_map(|t| t.foreign_keys().map(move |fk| (t, fk)))
                .find(|(_, fk)| fk.referenced_table() == Some(table.name.as_str()));
            if let Some((dependent, fk)) = referenced_by {
                return Err(format!(
                    "constraint {} on table {} depends on table {}",
                    fk.name(),
                    dependent.name,
                    table.name
                ));
            }
            let before = model.tables.len();
            model.tables.retain(|t| t.name != table.name);
            if model.tables.len() == before {
                return Err(format!("table \"{}\" does not exist", table.name));
            }
        }
        Operation::AddColumn { table, column } => {
            let target = existing_table(model, table)?;
            if target.column(&column.name).is_some() {
                return Err(format!("column \"{}\" already exists", column.name));
            }
            let mut column = column.clone();
            column.ordinal = target.next_ordinal();
            target.columns.push(column);
        }
        Operation::DropColumn { table, column } => {
            let referenced = model.tables.iter().any(|t| {
                t.foreign_keys().any(|fk| match fk {
                    Constraint::ForeignKey { references, .. } => {
                        references.table == *table && references.columns.contains(&column.name)
                    }
                    _ => false,
                })
            });
            if referenced {
                return Err(format!(
                    "other objects depend on column \"{}\" of table \"{}\"",
                    column.name, table
                ));
            }

            let target = existing_table(model, table)?;
            let before = target.columns.len();
            target.columns.retain(|c| c.name != column.name);
            if target.columns.len() == before {
                return Err(format!("column \"{}\" does not exist", column.name));
            }
            // Dependent indexes and constraints go with the column
            target.indexes.retain(|i| !i.columns.contains(&column.name));
            target
                .constraints
                .retain(|c| !constraint_columns(c).contains(&column.name));
        }
        Operation::AlterColumn { table, to, .. } => {
            let target = existing_table(model, table)?;
            let column = target
                .columns
                .iter_mut()
                .find(|c| c.name == to.name)
                .ok_or_else(|| format!("column \"{}\" does not exist", to.name))?;
            column.data_type = to.data_type.clone();
            column.nullable = to.nullable;
            column.default = to.default.clone();
        }
        Operation::CreateIndex { table, index } => {
            if model.tables.iter().any(|t| t.index(&index.name).is_some()) {
                return Err(format!("relation \"{}\" already exists", index.name));
            }
            let target = existing_table(model, table)?;
            if let Some(missing) = index.columns.iter().find(|c| target.column(c).is_none()) {
                return Err(format!("column \"{}\" does not exist", missing));
            }
            target.indexes.push(index.clone());
        }
        Operation::DropIndex { table, index } => {
            let target = existing_table(model, table)?;
            let before = target.indexes.len();
            target.indexes.retain(|i| i.name != index.name);
            if target.indexes.len() == before {
                return Err(format!("index \"{}\" does not exist", index.name));
            }
        }
        Operation::AddConstraint { table, constraint } => {
            check_foreign_key_target(model, constraint)?;
            let target = existing_table(model, table)?;
            if target.constraint(constraint.name()).is_some() {
                return Err(format!("constraint \"{}\" already exists", constraint.name()));
            }
            if let Some(missing) = constraint_columns(constraint)
                .iter()
                .find(|c| target.column(c).is_none())
            {
                return Err(format!("column \"{}\" does not exist", missing));
            }
            target.constraints.push(constraint.clone());
        }
        Operation::DropConstraint { table, constraint } => {
            let target = existing_table(model, table)?;
            let before = target.constraints.len();
            target.constraints.retain(|c| c.name() != constraint.name());
            if target.constraints.len() == before {
                return Err(format!("constraint \"{}\" does not exist", constraint.name()));
            }
        }
        Operation::RawSql { .. } => {
            return Err("raw SQL cannot be executed by the in-memory target".to_string());
        }
    }
    Ok(())
}

fn existing_table<'a>(
    model: &'a mut SchemaModel,
    name: &str,
) -> Result<&'a mut Table, String> {
    model
        .table_mut(name)
        .ok_or_else(|| format!("table \"{}\" does not exist", name))
}

fn constraint_columns(constraint: &Constraint) -> Vec<String> {
    match constraint {
        Constraint::PrimaryKey { columns, .. }
        | Constraint::Unique { columns, .. }
        | Constraint::ForeignKey { columns, .. } => columns.clone(),
        Constraint::Check { .. } => Vec::new(),
    }
}

/// Foreign keys must point at an existing table and columns
fn check_foreign_key_target(model: &SchemaModel, constraint: &Constraint) -> Result<(), String> {
    let Constraint::ForeignKey { references, .. } = constraint else {
        return Ok(());
    };

    let target = model
        .table(&references.table)
        .ok_or_else(|| format!("relation \"{}\" does not exist", references.table))?;

    match references.columns.iter().find(|c| target.column(c).is_none()) {
        Some(missing) => Err(format!(
            "column \"{}\" referenced in foreign key does not exist on {}",
            missing, references.table
        )),
        None => Ok(()),
    }
}
