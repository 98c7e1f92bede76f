//! Structured type descriptions per table
//!
//! Rendering them as TypeScript source is up to the caller.

use crate::schema::{CanonicalType, SchemaModel};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDefinition {
    pub table: String,
    pub fields: Vec<FieldType>,
}

pub fn type_name(data_type: &CanonicalType) -> &'static str {
    match data_type {
        CanonicalType::SmallInt
        | CanonicalType::Integer
        | CanonicalType::BigInt
        | CanonicalType::Decimal(_)
        | CanonicalType::Float
        | CanonicalType::Double => "number",
        CanonicalType::Boolean => "boolean",
        CanonicalType::String(_) | CanonicalType::Text | CanonicalType::Uuid | CanonicalType::Time => "string",
        CanonicalType::Date | CanonicalType::Timestamp | CanonicalType::TimestampTz => "Date",
        CanonicalType::Json | CanonicalType::Bytes => "unknown",
    }
}

/// One definition per table, fields in column position order
pub fn describe(model: &SchemaModel) -> Vec<TypeDefinition> {
    model
        .tables
        .iter()
        .map(|table| {
            let mut columns: Vec<_> = table.columns.iter().collect();
            columns.sort_by_key(|c| (c.ordinal, c.name.as_str()));

            TypeDefinition {
                table: table.name.clone(),
                fields: columns
                    .into_iter()
                    .map(|c| FieldType {
                        name: c.name.clone(),
                        type_name: type_name(&c.data_type),
                        optional: c.nullable,
                    })
                    .collect(),
            }
        })
        .collect()
}
