//! SchemaFlow Engine - schema drift detection and migrations
//!
//! Introspects a live database into a canonical model, snapshots it, diffs
//! it against a trusted baseline, generates reversible migrations and applies
//! them under an advisory lock with a durable ledger. A periodic monitor
//! reports unexpected drift.

pub mod config;
pub mod db;
pub mod drift;
pub mod engine;
pub mod error;
pub mod migration;
pub mod models;
pub mod monitor;
pub mod routes;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod typegen;
pub mod validation;

pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorKind};
