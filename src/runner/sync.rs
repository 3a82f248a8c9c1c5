use super::panic::capture_panic;
use super::transaction_span;
use crate::core::{BoxError, TxError, TxOptions};
use crate::engine::{Session, TransactionalEngine};
use std::cell::Cell;
use std::fmt::Display;
use tracing::{debug, error, trace, warn};

/// A unit of work executed against the open session.
pub type Task<'a, S, E> = Box<dyn FnOnce(&mut S) -> Result<(), E> + 'a>;

/// Boxes a closure as a [`Task`].
pub fn task<'a, S, E>(operation: impl FnOnce(&mut S) -> Result<(), E> + 'a) -> Task<'a, S, E> {
    Box::new(operation)
}

/// Runs tasks in order inside one session of a blocking engine.
///
/// The session is committed only when every task succeeds. The first
/// failing task stops the run and the session is rolled back. A panicking
/// task is contained and reported as [`TxError::TaskPanic`].
///
/// Rollbacks are contained the same way. A rollback that panics after a task
/// failure becomes [`TxError::Rollback`]; after a commit failure or a task
/// panic it is logged and the original error is returned.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use txrunner::{MemorySession, MemoryStore, TransactionRunner, TxOptions, task};
///
/// let store = MemoryStore::new();
/// let result = TransactionRunner::new(&store)
///     .options(TxOptions::new().label("restock"))
///     .run(vec![
///         task(|s: &mut MemorySession| -> anyhow::Result<()> {
///             s.put("medication", "295", json!({"otc_type": 11}))?;
///             Ok(())
///         }),
///         task(|s: &mut MemorySession| -> anyhow::Result<()> {
///             s.put("medication", "296", json!({"otc_type": 22}))?;
///             Ok(())
///         }),
///     ]);
///
/// assert!(result.is_ok());
/// assert_eq!(store.get("medication", "296").unwrap(), Some(json!({"otc_type": 22})));
/// ```
pub struct TransactionRunner<'e, G> {
    engine: &'e G,
    options: TxOptions,
}

impl<'e, G: TransactionalEngine> TransactionRunner<'e, G> {
    pub fn new(engine: &'e G) -> Self {
        Self {
            engine,
            options: TxOptions::default(),
        }
    }

    /// Set the options passed to the engine on begin
    pub fn options(mut self, options: TxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run<'t, E, I>(&self, tasks: I) -> Result<(), TxError<E>>
    where
        I: IntoIterator<Item = Task<'t, G::Session, E>>,
        E: Display,
    {
        self.execute(|session, current| {
            for (index, task) in tasks.into_iter().enumerate() {
                current.set(index);
                trace!(task = index, "running task");
                task(&mut *session)?;
            }
            Ok(())
        })
    }

    /// Runs a single closure and hands back its value once the session
    /// has been committed.
    pub fn run_with<T, E, F>(&self, operation: F) -> Result<T, TxError<E>>
    where
        F: FnOnce(&mut G::Session) -> Result<T, E>,
        E: Display,
    {
        self.execute(|session, _| operation(session))
    }

    fn execute<T, E, F>(&self, body: F) -> Result<T, TxError<E>>
    where
        F: FnOnce(&mut G::Session, &Cell<usize>) -> Result<T, E>,
        E: Display,
    {
        let span = transaction_span(&self.options);
        let _entered = span.enter();

        let mut session = self.engine.begin(&self.options).map_err(|err| {
            warn!(error = %err, "failed to start transaction");
            TxError::<E>::TransactionStart(Box::new(err))
        })?;
        debug!("transaction started");

        let current = Cell::new(0);
        match capture_panic(|| body(&mut session, &current)) {
            Ok(Ok(value)) => {
                if let Err(err) = session.commit() {
                    warn!(error = %err, "commit failed, rolling back");
                    if let Err(rollback_err) = rollback(&mut session) {
                        debug!(error = %rollback_err, "rollback after failed commit did not succeed");
                    }
                    return Err(TxError::Commit(Box::new(err)));
                }
                debug!("transaction committed");
                Ok(value)
            }
            Ok(Err(err)) => {
                let task = current.get();
                warn!(task, error = %err, "task failed, rolling back");
                if let Err(rollback_err) = rollback(&mut session) {
                    error!(task, error = %rollback_err, "rollback failed");
                    return Err(TxError::Rollback(rollback_err));
                }
                debug!("transaction rolled back");
                Err(TxError::Task(err))
            }
            Err(message) => {
                let task = current.get();
                error!(task, panic = %message, "task panicked, rolling back");
                match rollback(&mut session) {
                    Ok(()) => debug!("transaction rolled back"),
                    Err(rollback_err) => warn!(error = %rollback_err, "rollback after panic failed"),
                }
                Err(TxError::TaskPanic { task, message })
            }
        }
    }
}

/// Rolls `session` back, turning a panic inside the engine into an error.
fn rollback<S: Session>(session: &mut S) -> Result<(), BoxError> {
    match capture_panic(|| session.rollback()) {
        Ok(result) => result.map_err(|err| Box::new(err) as BoxError),
        Err(message) => Err(format!("rollback panicked: {message}").into()),
    }
}

/// Runs `tasks` in one transaction of `engine` with default options.
pub fn run_transaction<'t, G, E, I>(engine: &G, tasks: I) -> Result<(), TxError<E>>
where
    G: TransactionalEngine,
    I: IntoIterator<Item = Task<'t, G::Session, E>>,
    E: Display,
{
    TransactionRunner::new(engine).run(tasks)
}
