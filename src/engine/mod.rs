//! Seams between the runner and the transactional engine it drives.
//!
//! The runner never looks inside engine errors. It only needs a way to open a
//! session and, on that session, to commit or roll back.

use crate::core::TxOptions;
use async_trait::async_trait;

/// One open transaction on a blocking engine.
///
/// Implementations should reject a second commit or rollback once the
/// session has reached a terminal state. A failed `commit` must leave the
/// session able to accept a `rollback`.
pub trait Session {
    type Error: std::error::Error + Send + Sync + 'static;

    fn commit(&mut self) -> Result<(), Self::Error>;

    fn rollback(&mut self) -> Result<(), Self::Error>;
}

/// A blocking engine able to open transactional sessions.
pub trait TransactionalEngine {
    type Session: Session<Error = Self::Error>;
    type Error: std::error::Error + Send + Sync + 'static;

    fn begin(&self, options: &TxOptions) -> Result<Self::Session, Self::Error>;
}

/// An async engine addressed through cheap, cloneable transaction handles.
///
/// Each task of an async run receives its own clone of the handle; the
/// runner still executes them strictly one after another.
#[async_trait]
pub trait AsyncTransactionalEngine: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn begin(&self, options: &TxOptions) -> Result<Self::Handle, Self::Error>;

    async fn commit(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    async fn rollback(&self, handle: &Self::Handle) -> Result<(), Self::Error>;
}
