//! Normalized schema model
//!
//! The structure every component agrees on. Names are kept as introspected;
//! `canonicalize` sorts tables, columns, indexes and constraints by name so
//! that two models taken through different drivers compare cleanly.

use super::types::CanonicalType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full database schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaModel {
    pub tables: Vec<Table>,
}

/// Table representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: CanonicalType,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    /// 1-based position in the table as introspected
    pub ordinal: i32,
}

/// Index representation (constraint-backing indexes are not listed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Table and columns a foreign key points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyTarget {
    pub table: String,
    pub columns: Vec<String>,
}

/// Table-level constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Constraint {
    PrimaryKey {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        name: String,
        columns: Vec<String>,
        references: ForeignKeyTarget,
    },
    Check {
        name: String,
        expression: String,
    },
    Unique {
        name: String,
        columns: Vec<String>,
    },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::PrimaryKey { name, .. }
            | Constraint::ForeignKey { name, .. }
            | Constraint::Check { name, .. }
            | Constraint::Unique { name, .. } => name,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, Constraint::ForeignKey { .. })
    }

    /// Referenced table, for foreign keys
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            Constraint::ForeignKey { references, .. } => Some(&references.table),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Constraint::PrimaryKey { .. } => "primary key",
            Constraint::ForeignKey { .. } => "foreign key",
            Constraint::Check { .. } => "check",
            Constraint::Unique { .. } => "unique",
        }
    }
}

impl SchemaModel {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }.canonicalize()
    }

    /// Sort every collection by name
    pub fn canonicalize(mut self) -> Self {
        for table in &mut self.tables {
            table.columns.sort_by(|a, b| a.name.cmp(&b.name));
            table.indexes.sort_by(|a, b| a.name.cmp(&b.name));
            table.constraints.sort_by(|a, b| a.name().cmp(b.name()));
        }
        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.column(column).is_some())
            .unwrap_or(false)
    }

    /// Content hash over the canonical form
    pub fn checksum(&self) -> String {
        let canonical = self.clone().canonicalize();
        let bytes = serde_json::to_vec(&canonical.tables).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Equality ignoring column ordinals
    ///
    /// Ordinals depend on the order columns were added in, which a generated
    /// migration cannot reproduce.
    pub fn structurally_eq(&self, other: &SchemaModel) -> bool {
        fn strip(model: &SchemaModel) -> SchemaModel {
            let mut model = model.clone().canonicalize();
            for table in &mut model.tables {
                for column in &mut table.columns {
                    column.ordinal = 0;
                }
            }
            model
        }
        strip(self) == strip(other)
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    pub fn index_count(&self) -> usize {
        self.tables.iter().map(|t| t.indexes.len()).sum()
    }

    pub fn foreign_key_count(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|t| t.constraints.iter())
            .filter(|c| c.is_foreign_key())
            .count()
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name() == name)
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| matches!(c, Constraint::PrimaryKey { .. }))
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }

    /// Copy of this table without foreign keys
    pub fn without_foreign_keys(&self) -> Table {
        Table {
            constraints: self
                .constraints
                .iter()
                .filter(|c| !c.is_foreign_key())
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    pub fn next_ordinal(&self) -> i32 {
        self.columns.iter().map(|c| c.ordinal).max().unwrap_or(0) + 1
    }
}
