//! Migration targets
//!
//! The manager is driver-agnostic; a target supplies sessions that can lock,
//! read and write the ledger, and run operations in one transaction.

use super::ledger::{Ledger, MigrationRecord};
use super::operation::Operation;
use crate::error::EngineResult;
use async_trait::async_trait;

/// Work for one migration transaction
///
/// `before` is written first, then `operations` run, then `after` is written.
/// Any failure rolls the whole transaction back.
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub before: MigrationRecord,
    pub operations: Vec<Operation>,
    pub after: MigrationRecord,
}

/// A single connection to the target database
#[async_trait]
pub trait MigrationSession: Send {
    /// Create the ledger table if it does not exist
    async fn ensure_ledger(&mut self) -> EngineResult<()>;

    /// Try once to take the advisory lock; `false` if another session holds it
    async fn try_lock(&mut self, key: i64) -> EngineResult<bool>;

    async fn unlock(&mut self, key: i64) -> EngineResult<()>;

    /// Current ledger contents (empty if the ledger table does not exist)
    async fn ledger(&mut self) -> EngineResult<Ledger>;

    async fn execute(&mut self, plan: &TransactionPlan) -> EngineResult<()>;

    /// Write one ledger row outside a migration transaction
    async fn record(&mut self, record: &MigrationRecord) -> EngineResult<()>;
}

#[async_trait]
pub trait MigrationTarget: Send + Sync {
    async fn session(&self) -> EngineResult<Box<dyn MigrationSession>>;
}
