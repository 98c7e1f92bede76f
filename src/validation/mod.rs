//! Validation Engine
//!
//! Checks application artifacts (API routes, forms) against the analyzed
//! schema. Discovering the artifacts is left to the caller; each one simply
//! lists the `table.column` fields it reads or writes.

use crate::config::ValidationConfig;
use crate::schema::SchemaModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Route,
    Form,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Route => f.write_str("route"),
            ArtifactKind::Form => f.write_str("form"),
        }
    }
}

/// A `table.column` an artifact depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    pub table: String,
    pub column: String,
    /// Form input that must be filled in
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub fields: Vec<FieldRef>,
}

impl Artifact {
    pub fn route(name: impl Into<String>, fields: Vec<FieldRef>) -> Self {
        Self {
            kind: ArtifactKind::Route,
            name: name.into(),
            fields,
        }
    }

    pub fn form(name: impl Into<String>, fields: Vec<FieldRef>) -> Self {
        Self {
            kind: ArtifactKind::Form,
            name: name.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// `{kind}:{artifact}:{table}[.{column}]`
    pub path: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let count = |s: Severity| results.iter().filter(|r| r.severity == s).count();
        let errors = count(Severity::Error);
        Self {
            valid: errors == 0,
            errors,
            warnings: count(Severity::Warning),
            results,
        }
    }
}

pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, model: &SchemaModel, artifacts: &[Artifact]) -> Vec<ValidationResult> {
        let mut results = Vec::new();

        for artifact in artifacts {
            let mut tables_checked = BTreeSet::new();

            for field in &artifact.fields {
                if self.config.ignore_tables.iter().any(|t| t == &field.table) {
                    continue;
                }
                let table_path = format!("{}:{}:{}", artifact.kind, artifact.name, field.table);
                let field_path = format!("{}.{}", table_path, field.column);

                let Some(table) = model.table(&field.table) else {
                    results.push(self.result(
                        field_path,
                        Severity::Error,
                        format!("Table '{}' does not exist", field.table),
                    ));
                    continue;
                };

                if artifact.kind == ArtifactKind::Route
                    && tables_checked.insert(field.table.clone())
                    && table.primary_key().is_none()
                {
                    results.push(self.result(
                        table_path,
                        Severity::Info,
                        format!("Table '{}' has no primary key", field.table),
                    ));
                }

                let Some(column) = table.column(&field.column) else {
                    results.push(self.result(
                        field_path,
                        Severity::Error,
                        format!("Column '{}' does not exist on '{}'", field.column, field.table),
                    ));
                    continue;
                };

                if artifact.kind == ArtifactKind::Form && field.required && column.nullable {
                    results.push(self.result(
                        field_path,
                        Severity::Warning,
                        format!(
                            "Required field is backed by nullable column {}.{}",
                            field.table, field.column
                        ),
                    ));
                }
            }
        }

        results
    }

    fn result(&self, path: String, severity: Severity, message: String) -> ValidationResult {
        let severity = match severity {
            Severity::Warning if self.config.strict => Severity::Error,
            other => other,
        };
        ValidationResult {
            path,
            severity,
            message,
        }
    }
}
