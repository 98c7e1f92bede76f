//! Schema analysis
//!
//! Canonical model, type normalization and the sources a model is read from.

pub mod analyzer;
pub mod model;
pub mod postgres;
pub mod types;

pub use analyzer::{
    Analysis, RawColumn, RawTable, SchemaAnalyzer, SchemaProvider, SchemaSource,
    UnsupportedTypeWarning,
};
pub use model::{Column, Constraint, ForeignKeyTarget, Index, SchemaModel, Table};
pub use types::CanonicalType;
