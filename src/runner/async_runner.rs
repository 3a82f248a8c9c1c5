use super::panic::panic_message;
use super::transaction_span;
use crate::core::{BoxError, TxError, TxOptions};
use crate::engine::AsyncTransactionalEngine;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{Instrument, debug, error, trace, warn};

/// An async unit of work. It receives its own clone of the transaction handle.
pub type AsyncTask<'a, H, E> = Box<dyn FnOnce(H) -> BoxFuture<'a, Result<(), E>> + Send + 'a>;

/// Boxes an async closure as an [`AsyncTask`].
pub fn async_task<'a, H, E, F, Fut>(operation: F) -> AsyncTask<'a, H, E>
where
    F: FnOnce(H) -> Fut + Send + 'a,
    Fut: Future<Output = Result<(), E>> + Send + 'a,
{
    Box::new(move |handle| operation(handle).boxed())
}

enum Outcome<T, E> {
    Completed(T),
    Failed(usize, E),
    Panicked(usize, String),
}

/// Async counterpart of [`TransactionRunner`](super::TransactionRunner).
///
/// Tasks are awaited one at a time, never concurrently. A panic raised
/// while a task builds or polls its future is caught and reported as
/// [`TxError::TaskPanic`]. Rollback futures are guarded the same way as in
/// the blocking runner.
///
/// ```
/// use serde_json::json;
/// use txrunner::{AsyncTransactionRunner, MemoryHandle, MemoryStore, async_task};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// AsyncTransactionRunner::new(&store)
///     .run::<anyhow::Error>(vec![async_task(|tx: MemoryHandle| async move {
///         tx.put("orders", "1001", json!({"status": "paid"}))?;
///         Ok::<(), anyhow::Error>(())
///     })])
///     .await
///     .unwrap();
///
/// assert_eq!(store.get("orders", "1001").unwrap(), Some(json!({"status": "paid"})));
/// # });
/// ```
pub struct AsyncTransactionRunner<'e, G> {
    engine: &'e G,
    options: TxOptions,
}

impl<'e, G: AsyncTransactionalEngine> AsyncTransactionRunner<'e, G> {
    pub fn new(engine: &'e G) -> Self {
        Self {
            engine,
            options: TxOptions::default(),
        }
    }

    pub fn options(mut self, options: TxOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run<'t, E>(&self, tasks: Vec<AsyncTask<'t, G::Handle, E>>) -> Result<(), TxError<E>>
    where
        E: Display + Send,
    {
        let span = transaction_span(&self.options);
        async move {
            let handle = self.begin::<E>().await?;

            let mut outcome = Outcome::Completed(());
            for (index, task) in tasks.into_iter().enumerate() {
                trace!(task = index, "running task");
                let task_handle = handle.clone();
                let polled = AssertUnwindSafe(async move { task(task_handle).await })
                    .catch_unwind()
                    .await;
                match polled {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        outcome = Outcome::Failed(index, err);
                        break;
                    }
                    Err(payload) => {
                        outcome = Outcome::Panicked(index, panic_message(payload.as_ref()));
                        break;
                    }
                }
            }

            self.resolve(&handle, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Runs a single async closure and returns its value after commit.
    pub async fn run_with<T, E, F, Fut>(&self, operation: F) -> Result<T, TxError<E>>
    where
        F: FnOnce(G::Handle) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: Display + Send,
    {
        let span = transaction_span(&self.options);
        async move {
            let handle = self.begin::<E>().await?;

            let task_handle = handle.clone();
            let polled = AssertUnwindSafe(async move { operation(task_handle).await })
                .catch_unwind()
                .await;
            let outcome = match polled {
                Ok(Ok(value)) => Outcome::Completed(value),
                Ok(Err(err)) => Outcome::Failed(0, err),
                Err(payload) => Outcome::Panicked(0, panic_message(payload.as_ref())),
            };

            self.resolve(&handle, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn begin<E>(&self) -> Result<G::Handle, TxError<E>> {
        let handle = self.engine.begin(&self.options).await.map_err(|err| {
            warn!(error = %err, "failed to start transaction");
            TxError::<E>::TransactionStart(Box::new(err))
        })?;
        debug!("transaction started");
        Ok(handle)
    }

    async fn resolve<T, E>(&self, handle: &G::Handle, outcome: Outcome<T, E>) -> Result<T, TxError<E>>
    where
        E: Display,
    {
        match outcome {
            Outcome::Completed(value) => {
                if let Err(err) = self.engine.commit(handle).await {
                    warn!(error = %err, "commit failed, rolling back");
                    if let Err(rollback_err) = self.rollback(handle).await {
                        debug!(error = %rollback_err, "rollback after failed commit did not succeed");
                    }
                    return Err(TxError::Commit(Box::new(err)));
                }
                debug!("transaction committed");
                Ok(value)
            }
            Outcome::Failed(task, err) => {
                warn!(task, error = %err, "task failed, rolling back");
                if let Err(rollback_err) = self.rollback(handle).await {
                    error!(task, error = %rollback_err, "rollback failed");
                    return Err(TxError::Rollback(rollback_err));
                }
                debug!("transaction rolled back");
                Err(TxError::Task(err))
            }
            Outcome::Panicked(task, message) => {
                error!(task, panic = %message, "task panicked, rolling back");
                match self.rollback(handle).await {
                    Ok(()) => debug!("transaction rolled back"),
                    Err(rollback_err) => warn!(error = %rollback_err, "rollback after panic failed"),
                }
                Err(TxError::TaskPanic { task, message })
            }
        }
    }

    async fn rollback(&self, handle: &G::Handle) -> Result<(), BoxError> {
        match AssertUnwindSafe(self.engine.rollback(handle)).catch_unwind().await {
            Ok(result) => result.map_err(|err| Box::new(err) as BoxError),
            Err(payload) => {
                Err(format!("rollback panicked: {}", panic_message(payload.as_ref())).into())
            }
        }
    }
}

/// Runs `tasks` in one transaction of an async `engine` with default options.
pub async fn run_transaction_async<'t, G, E>(
    engine: &G,
    tasks: Vec<AsyncTask<'t, G::Handle, E>>,
) -> Result<(), TxError<E>>
where
    G: AsyncTransactionalEngine,
    E: Display + Send,
{
    AsyncTransactionRunner::new(engine).run(tasks).await
}
