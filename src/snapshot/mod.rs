//! Schema Snapshot Module
//!
//! Point-in-time captures of the schema, one of which is the baseline that
//! drift is measured against.

pub mod store;

pub use store::{Snapshot, SnapshotMetadata, SnapshotStore};
