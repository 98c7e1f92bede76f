//! Impact classification rules

use super::Impact;
use crate::schema::{Column, Constraint, Index};

/// One attribute difference on a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChange {
    pub impact: Impact,
    pub description: String,
}

/// Attribute differences between two versions of the same column
///
/// Position is handled by the detector since it depends on sibling columns.
pub fn column_sub_changes(before: &Column, after: &Column) -> Vec<SubChange> {
    let mut changes = Vec::new();

    if before.data_type != after.data_type {
        let impact = if after.data_type.widens(&before.data_type) {
            Impact::NonBreaking
        } else {
            Impact::Breaking
        };
        let verb = if impact == Impact::Breaking { "narrowed" } else { "widened" };
        changes.push(SubChange {
            impact,
            description: format!("type {} {} -> {}", verb, before.data_type, after.data_type),
        });
    }

    match (before.nullable, after.nullable) {
        (true, false) => {
            let impact = if after.default.is_none() {
                Impact::Breaking
            } else {
                Impact::NonBreaking
            };
            changes.push(SubChange {
                impact,
                description: "nullable -> NOT NULL".to_string(),
            });
        }
        (false, true) => changes.push(SubChange {
            impact: Impact::NonBreaking,
            description: "NOT NULL -> nullable".to_string(),
        }),
        _ => {}
    }

    if before.default != after.default {
        changes.push(SubChange {
            impact: Impact::NonBreaking,
            description: format!(
                "default {} -> {}",
                before.default.as_deref().unwrap_or("none"),
                after.default.as_deref().unwrap_or("none")
            ),
        });
    }

    changes
}

/// A new column on an existing table
pub fn column_added(column: &Column) -> Impact {
    if column.nullable || column.default.is_some() {
        Impact::NonBreaking
    } else {
        Impact::Breaking
    }
}

pub fn index_added(index: &Index) -> Impact {
    // Existing rows may already hold duplicates
    if index.unique {
        Impact::Breaking
    } else {
        Impact::NonBreaking
    }
}

pub fn index_removed(index: &Index) -> Impact {
    if index.unique {
        Impact::Breaking
    } else {
        Impact::NonBreaking
    }
}

pub fn index_modified(before: &Index, after: &Index) -> Impact {
    if before.unique != after.unique {
        Impact::Breaking
    } else {
        Impact::NonBreaking
    }
}

/// A constraint added to a table that already holds data
pub fn constraint_added(_constraint: &Constraint) -> Impact {
    Impact::Breaking
}

pub fn constraint_removed(_constraint: &Constraint) -> Impact {
    Impact::NonBreaking
}

pub fn constraint_modified(_before: &Constraint, _after: &Constraint) -> Impact {
    Impact::Breaking
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::fixtures::column;
    use crate::schema::CanonicalType;

    #[test]
    fn test_nullable_to_not_null() {
        let before = column("email", CanonicalType::Text, true, 1);
        let mut after = column("email", CanonicalType::Text, false, 1);

        let changes = column_sub_changes(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].impact, Impact::Breaking);

        after.default = Some("''::text".to_string());
        let changes = column_sub_changes(&before, &after);
        assert!(changes.iter().all(|c| c.impact == Impact::NonBreaking));
    }

    #[test]
    fn test_type_change_classification() {
        let before = column("total", CanonicalType::Integer, false, 1);
        let widened = column("total", CanonicalType::BigInt, false, 1);
        let narrowed = column("total", CanonicalType::SmallInt, false, 1);

        assert_eq!(column_sub_changes(&before, &widened)[0].impact, Impact::NonBreaking);
        assert_eq!(column_sub_changes(&before, &narrowed)[0].impact, Impact::Breaking);
    }

    #[test]
    fn test_column_added_impact() {
        assert_eq!(column_added(&column("phone", CanonicalType::Text, true, 3)), Impact::NonBreaking);
        assert_eq!(column_added(&column("phone", CanonicalType::Text, false, 3)), Impact::Breaking);
    }
}
