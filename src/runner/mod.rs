// ============================================================================
// Transactional Task Runner
// ============================================================================
//
// Begins one session, runs caller tasks strictly in order, then commits or
// rolls back. Every run ends in exactly one of:
//
//   begin failed                      -> TransactionStart
//   task failed, rollback ok          -> Task (the task's own error)
//   task failed, rollback failed      -> Rollback
//   task panicked                     -> TaskPanic
//   all ok, commit failed             -> Commit (rollback attempted, unreported)
//   all ok, commit ok                 -> Ok
//
// ============================================================================

mod async_runner;
mod panic;
mod sync;

pub use async_runner::{AsyncTask, AsyncTransactionRunner, async_task, run_transaction_async};
pub use sync::{Task, TransactionRunner, run_transaction, task};

use crate::core::TxOptions;
use tracing::{Span, info_span};

fn transaction_span(options: &TxOptions) -> Span {
    info_span!(
        "transaction",
        label = options.span_label(),
        isolation = %options.isolation_level
    )
}
