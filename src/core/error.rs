use crate::core::IsolationLevel;
use crate::transaction::{TransactionId, TransactionState};
use thiserror::Error;

/// Boxed engine failure carried as the cause of a runner error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phase of a transactional run that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxErrorKind {
    /// The engine refused to open a session.
    TransactionStart,
    /// A task returned a failure and the rollback that followed succeeded.
    Task,
    /// A task failed and the rollback that followed failed too.
    Rollback,
    /// A task panicked instead of returning a failure.
    TaskPanic,
    /// Every task succeeded but the engine refused to commit.
    Commit,
}

impl std::fmt::Display for TxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxErrorKind::TransactionStart => "transaction_start",
            TxErrorKind::Task => "task",
            TxErrorKind::Rollback => "rollback",
            TxErrorKind::TaskPanic => "task_panic",
            TxErrorKind::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Terminal error of one transactional run.
///
/// `E` is the failure type returned by tasks. It is handed back untouched in
/// [`TxError::Task`] when the rollback that follows it succeeds, so
/// `to_string()` on that variant is exactly the task's own message.
#[derive(Error, Debug)]
pub enum TxError<E> {
    #[error("failed to start transaction: {0}")]
    TransactionStart(#[source] BoxError),

    #[error("{0}")]
    Task(E),

    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] BoxError),

    #[error("task {task} panicked inside transaction: {message}")]
    TaskPanic { task: usize, message: String },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] BoxError),
}

impl<E> TxError<E> {
    pub fn kind(&self) -> TxErrorKind {
        match self {
            TxError::TransactionStart(_) => TxErrorKind::TransactionStart,
            TxError::Task(_) => TxErrorKind::Task,
            TxError::Rollback(_) => TxErrorKind::Rollback,
            TxError::TaskPanic { .. } => TxErrorKind::TaskPanic,
            TxError::Commit(_) => TxErrorKind::Commit,
        }
    }

    /// The task's failure value, if this error is one.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            TxError::Task(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_task_error(self) -> Option<E> {
        match self {
            TxError::Task(err) => Some(err),
            _ => None,
        }
    }

    /// The engine failure wrapped by start, rollback and commit errors.
    pub fn engine_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            TxError::TransactionStart(cause) | TxError::Rollback(cause) | TxError::Commit(cause) => {
                Some(cause.as_ref())
            }
            TxError::Task(_) | TxError::TaskPanic { .. } => None,
        }
    }

    /// Panic message captured from a faulting task.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            TxError::TaskPanic { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Errors raised by [`MemoryStore`](crate::memory::MemoryStore) and its sessions.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Isolation level {0} is not supported")]
    UnsupportedIsolation(IsolationLevel),

    #[error("Transaction {id} is {state}")]
    NotActive {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("Transaction {0} is read-only")]
    ReadOnly(TransactionId),

    #[error("Write-write conflict on '{table}.{key}'")]
    WriteConflict { table: String, key: String },

    #[error("Injected {0} failure")]
    Injected(&'static str),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
