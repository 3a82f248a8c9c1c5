// ============================================================================
// txrunner
// ============================================================================
//
// Runs an ordered list of tasks against one transactional session and
// resolves the run into a single commit or rollback.
//
// ============================================================================

pub mod core;
pub mod engine;
pub mod memory;
pub mod runner;
pub mod transaction;

pub use crate::core::{BoxError, IsolationLevel, StoreError, StoreResult, TxError, TxErrorKind, TxOptions};
pub use crate::engine::{AsyncTransactionalEngine, Session, TransactionalEngine};
pub use crate::memory::{FaultPlan, MemoryHandle, MemorySession, MemoryStore, StoreStats};
pub use crate::runner::{
    AsyncTask, AsyncTransactionRunner, Task, TransactionRunner, async_task, run_transaction,
    run_transaction_async, task,
};
pub use crate::transaction::{Change, TransactionId, TransactionState};
