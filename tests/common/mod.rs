//! Shared builders for integration tests

#![allow(dead_code)]

use schemaflow_engine::config::MigrationConfig;
use schemaflow_engine::migration::{
    InMemoryTarget, Migration, MigrationManager, MigrationRepository, Operation,
};
use schemaflow_engine::schema::{
    CanonicalType, Column, Constraint, ForeignKeyTarget, Index, SchemaModel, Table,
};
use std::sync::Arc;
use std::time::Duration;

pub fn col(name: &str, data_type: CanonicalType, nullable: bool, ordinal: i32) -> Column {
    Column {
        name: name.to_string(),
        data_type,
        nullable,
        default: None,
        ordinal,
    }
}

pub fn pk(table: &str, column: &str) -> Constraint {
    Constraint::PrimaryKey {
        name: format!("{}_pkey", table),
        columns: vec![column.to_string()],
    }
}

pub fn fk(name: &str, column: &str, table: &str, target: &str) -> Constraint {
    Constraint::ForeignKey {
        name: name.to_string(),
        columns: vec![column.to_string()],
        references: ForeignKeyTarget {
            table: table.to_string(),
            columns: vec![target.to_string()],
        },
    }
}

pub fn users() -> Table {
    Table {
        name: "users".into(),
        columns: vec![
            col("id", CanonicalType::Integer, false, 1),
            col("email", CanonicalType::String(Some(255)), false, 2),
        ],
        indexes: vec![],
        constraints: vec![pk("users", "id")],
    }
}

pub fn orders() -> Table {
    Table {
        name: "orders".into(),
        columns: vec![
            col("id", CanonicalType::BigInt, false, 1),
            col("user_id", CanonicalType::Integer, false, 2),
            col("total", CanonicalType::Decimal(Some((10, 2))), true, 3),
        ],
        indexes: vec![Index {
            name: "orders_user_id_idx".into(),
            columns: vec!["user_id".into()],
            unique: false,
        }],
        constraints: vec![pk("orders", "id"), fk("orders_user_id_fkey", "user_id", "users", "id")],
    }
}

pub fn model(tables: Vec<Table>) -> SchemaModel {
    SchemaModel::new(tables)
}

pub fn create_users(version: u64) -> Migration {
    Migration::new(
        version,
        "create_users",
        vec![Operation::CreateTable { table: users() }],
        vec![Operation::DropTable { table: users() }],
    )
}

pub fn add_column(version: u64, table: &str, column: Column) -> Migration {
    Migration::new(
        version,
        format!("add_{}_{}", table, column.name),
        vec![Operation::AddColumn {
            table: table.into(),
            column: column.clone(),
        }],
        vec![Operation::DropColumn {
            table: table.into(),
            column,
        }],
    )
}

pub fn fast_lock_config() -> MigrationConfig {
    MigrationConfig {
        lock_timeout: Duration::from_millis(150),
        lock_poll_interval: Duration::from_millis(10),
        ..MigrationConfig::default()
    }
}

pub async fn manager_with(
    target: &InMemoryTarget,
    repository: Arc<MigrationRepository>,
) -> MigrationManager {
    MigrationManager::new(Arc::new(target.clone()), repository, fast_lock_config())
}

pub async fn in_memory_repository(migrations: Vec<Migration>) -> Arc<MigrationRepository> {
    let repository = MigrationRepository::in_memory();
    for migration in migrations {
        repository.register(migration).await.unwrap();
    }
    Arc::new(repository)
}
