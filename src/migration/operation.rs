//! Migration operations
//!
//! Structured DDL steps. Every operation except raw SQL carries enough of the
//! entity definition to produce its own inverse, which is how `down` lists are
//! derived.

use crate::schema::{Column, Constraint, Index, Table};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table; foreign keys are always added separately
    CreateTable { table: Table },
    DropTable { table: Table },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: Column },
    AlterColumn { table: String, from: Column, to: Column },
    CreateIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
    AddConstraint { table: String, constraint: Constraint },
    DropConstraint { table: String, constraint: Constraint },
    /// Hand-written statement; has no derivable inverse
    RawSql { sql: String },
}

impl Operation {
    /// Operation that undoes this one
    pub fn inverse(&self) -> Option<Operation> {
        let inverse = match self {
            Operation::CreateTable { table } => Operation::DropTable {
                table: table.clone(),
            },
            Operation::DropTable { table } => Operation::CreateTable {
                table: table.clone(),
            },
            Operation::AddColumn { table, column } => Operation::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::DropColumn { table, column } => Operation::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::AlterColumn { table, from, to } => Operation::AlterColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Operation::CreateIndex { table, index } => Operation::DropIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Operation::DropIndex { table, index } => Operation::CreateIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Operation::AddConstraint { table, constraint } => Operation::DropConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Operation::DropConstraint { table, constraint } => Operation::AddConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Operation::RawSql { .. } => return None,
        };
        Some(inverse)
    }

    /// Table the operation touches, if any
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Operation::CreateTable { table } | Operation::DropTable { table } => Some(&table.name),
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumn { table, .. }
            | Operation::CreateIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::AddConstraint { table, .. }
            | Operation::DropConstraint { table, .. } => Some(table),
            Operation::RawSql { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table } => format!("create table {}", table.name),
            Operation::DropTable { table } => format!("drop table {}", table.name),
            Operation::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            Operation::DropColumn { table, column } => format!("drop column {}.{}", table, column.name),
            Operation::AlterColumn { table, to, .. } => format!("alter column {}.{}", table, to.name),
            Operation::CreateIndex { index, .. } => format!("create index {}", index.name),
            Operation::DropIndex { index, .. } => format!("drop index {}", index.name),
            Operation::AddConstraint { table, constraint } => {
                format!("add {} {} on {}", constraint.label(), constraint.name(), table)
            }
            Operation::DropConstraint { table, constraint } => {
                format!("drop {} {} on {}", constraint.label(), constraint.name(), table)
            }
            Operation::RawSql { sql } => {
                let first_line = sql.lines().next().unwrap_or_default();
                format!("sql: {}", first_line)
            }
        }
    }

    /// PostgreSQL statements for this operation
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            Operation::CreateTable { table } => create_table_sql(table),
            Operation::DropTable { table } => vec![format!("DROP TABLE {};", quote(&table.name))],
            Operation::AddColumn { table, column } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                quote(table),
                column_definition(column)
            )],
            Operation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN {};",
                quote(table),
                quote(&column.name)
            )],
            Operation::AlterColumn { table, from, to } => alter_column_sql(table, from, to),
            Operation::CreateIndex { table, index } => vec![create_index_sql(table, index)],
            Operation::DropIndex { index, .. } => vec![format!("DROP INDEX {};", quote(&index.name))],
            Operation::AddConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} ADD {};",
                quote(table),
                constraint_definition(constraint)
            )],
            Operation::DropConstraint { table, constraint } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                quote(table),
                quote(constraint.name())
            )],
            Operation::RawSql { sql } => vec![sql.clone()],
        }
    }
}

/// Quote an identifier, doubling embedded quotes
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_list(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|i| quote(i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", quote(&column.name), column.data_type.to_pg_type());
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    def
}

fn constraint_definition(constraint: &Constraint) -> String {
    match constraint {
        Constraint::PrimaryKey { name, columns } => {
            format!("CONSTRAINT {} PRIMARY KEY ({})", quote(name), quote_list(columns))
        }
        Constraint::Unique { name, columns } => {
            format!("CONSTRAINT {} UNIQUE ({})", quote(name), quote_list(columns))
        }
        Constraint::Check { name, expression } => {
            format!("CONSTRAINT {} CHECK ({})", quote(name), expression)
        }
        Constraint::ForeignKey {
            name,
            columns,
            references,
        } => format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote(name),
            quote_list(columns),
            quote(&references.table),
            quote_list(&references.columns)
        ),
    }
}

fn create_table_sql(table: &Table) -> Vec<String> {
    let mut columns: Vec<&Column> = table.columns.iter().collect();
    columns.sort_by_key(|c| (c.ordinal, c.name.clone()));

    let mut lines: Vec<String> = columns
        .iter()
        .map(|c| format!("    {}", column_definition(c)))
        .collect();
    lines.extend(
        table
            .constraints
            .iter()
            .filter(|c| !c.is_foreign_key())
            .map(|c| format!("    {}", constraint_definition(c))),
    );

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n{}\n);",
        quote(&table.name),
        lines.join(",\n")
    )];
    statements.extend(table.indexes.iter().map(|i| create_index_sql(&table.name, i)));
    statements
}

fn create_index_sql(table: &str, index: &Index) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(table),
        quote_list(&index.columns)
    )
}

fn alter_column_sql(table: &str, from: &Column, to: &Column) -> Vec<String> {
    let mut statements = Vec::new();
    let prefix = format!("ALTER TABLE {} ALTER COLUMN {}", quote(table), quote(&to.name));

    if from.data_type != to.data_type {
        let pg_type = to.data_type.to_pg_type();
        statements.push(format!(
            "{} TYPE {} USING {}::{};",
            prefix,
            pg_type,
            quote(&to.name),
            pg_type
        ));
    }

    if from.default != to.default {
        match &to.default {
            Some(default) => statements.push(format!("{} SET DEFAULT {};", prefix, default)),
            None => statements.push(format!("{} DROP DEFAULT;", prefix)),
        }
    }

    if from.nullable != to.nullable {
        if to.nullable {
            statements.push(format!("{} DROP NOT NULL;", prefix));
        } else {
            statements.push(format!("{} SET NOT NULL;", prefix));
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures::*;
    use crate::schema::CanonicalType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_table_sql_orders_by_ordinal() {
        let sql = Operation::CreateTable { table: users() }.to_sql();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"users\" (\n    \"id\" INTEGER NOT NULL,\n    \"email\" VARCHAR(255) NOT NULL,\n    CONSTRAINT \"users_pkey\" PRIMARY KEY (\"id\")\n);"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_alter_column_sql() {
        let from = column("email", CanonicalType::String(Some(64)), false, 2);
        let mut to = column("email", CanonicalType::Text, true, 2);
        to.default = Some("''".to_string());

        let sql = Operation::AlterColumn {
            table: "users".to_string(),
            from,
            to,
        }
        .to_sql();

        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" TYPE TEXT USING \"email\"::TEXT;",
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" SET DEFAULT '';",
                "ALTER TABLE \"users\" ALTER COLUMN \"email\" DROP NOT NULL;",
            ]
        );
    }

    #[test]
    fn test_inverse_round_trips() {
        let op = Operation::AddConstraint {
            table: "orders".to_string(),
            constraint: fk("orders_user_fk", "user_id", "users", "id"),
        };
        let inverse = op.inverse().unwrap();
        assert!(matches!(inverse, Operation::DropConstraint { .. }));
        assert_eq!(inverse.inverse().unwrap(), op);

        assert!(Operation::RawSql { sql: "SELECT 1".into() }.inverse().is_none());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("weird\"name"), "\"weird\"\"name\"");
    }
}
