use super::{Fault, StoreInner, Versioned};
use crate::core::{StoreError, StoreResult};
use crate::engine::Session;
use crate::transaction::{Change, TransactionId, TransactionState};
use log::{debug, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One open transaction on a [`MemoryStore`](super::MemoryStore).
///
/// Writes are buffered and become visible to other sessions only on commit.
/// Reads see the session's own writes first, then the latest committed value,
/// which gives read-committed isolation.
///
/// Commit and rollback belong to the runner. Tasks holding `&mut
/// MemorySession` cannot finish the session themselves:
///
/// ```compile_fail
/// use txrunner::{MemoryStore, TxOptions};
///
/// let store = MemoryStore::new();
/// let mut session = store.begin_session(&TxOptions::default()).unwrap();
/// session.commit().unwrap();
/// ```
#[derive(Debug)]
pub struct MemorySession {
    id: TransactionId,
    state: TransactionState,
    read_only: bool,
    /// Store version observed at begin; a key committed past it by someone
    /// else is a write-write conflict.
    read_version: u64,
    changes: Vec<Change>,
    store: Arc<StoreInner>,
    started_at: Instant,
}

impl MemorySession {
    pub(super) fn new(
        store: Arc<StoreInner>,
        read_version: u64,
        read_only: bool,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            read_only,
            read_version,
            changes: Vec::new(),
            store,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of buffered writes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
        self.ensure_active()?;

        if let Some(change) = self.changes.iter().rev().find(|c| c.touches(table, key)) {
            return Ok(change.value().cloned());
        }

        let tables = self.store.tables.read()?;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .and_then(|entry| entry.value.clone()))
    }

    pub fn put(
        &mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> StoreResult<()> {
        self.ensure_writable()?;
        self.changes.push(Change::Put {
            table: table.into(),
            key: key.into(),
            value,
        });
        Ok(())
    }

    pub fn delete(&mut self, table: impl Into<String>, key: impl Into<String>) -> StoreResult<()> {
        self.ensure_writable()?;
        self.changes.push(Change::Delete {
            table: table.into(),
            key: key.into(),
        });
        Ok(())
    }

    /// Applies every buffered write atomically.
    ///
    /// On failure the session stays active so it can still be rolled back.
    pub(crate) fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;

        if self.store.take_fault(Fault::Commit)? {
            self.store.stats.record_failed_commit();
            return Err(StoreError::Injected("commit"));
        }

        let mut tables = self.store.tables.write()?;
        for change in &self.changes {
            let committed = tables
                .get(change.table_name())
                .and_then(|rows| rows.get(change.key()));
            if let Some(entry) = committed {
                if entry.version > self.read_version {
                    self.store.stats.record_failed_commit();
                    return Err(StoreError::WriteConflict {
                        table: change.table_name().to_string(),
                        key: change.key().to_string(),
                    });
                }
            }
        }

        let version = self.store.next_version();
        let applied = self.changes.len();
        for change in self.changes.drain(..) {
            let (table, key, value) = match change {
                Change::Put { table, key, value } => (table, key, Some(value)),
                Change::Delete { table, key } => (table, key, None),
            };
            tables
                .entry(table)
                .or_default()
                .insert(key, Versioned { value, version });
        }
        drop(tables);

        self.state = TransactionState::Committed;
        self.store.stats.record_commit();
        debug!(
            "{} committed {} change(s) at version {} after {:?}",
            self.id,
            applied,
            version,
            self.duration()
        );
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_active()?;

        if self.store.take_fault(Fault::Rollback)? {
            return Err(StoreError::Injected("rollback"));
        }

        let discarded = self.changes.len();
        self.changes.clear();
        self.state = TransactionState::Aborted;
        self.store.stats.record_rollback();
        debug!(
            "{} rolled back, discarded {} change(s) after {:?}",
            self.id,
            discarded,
            self.duration()
        );
        Ok(())
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if !self.state.is_active() {
            return Err(StoreError::NotActive {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(StoreError::ReadOnly(self.id));
        }
        Ok(())
    }
}

impl Session for MemorySession {
    type Error = StoreError;

    fn commit(&mut self) -> StoreResult<()> {
        MemorySession::commit(self)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        MemorySession::rollback(self)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.state.is_active() {
            warn!(
                "{} dropped while active, discarding {} change(s)",
                self.id,
                self.changes.len()
            );
            self.changes.clear();
            self.state = TransactionState::Aborted;
            self.store.stats.record_abandoned();
        }
    }
}

/// Shared handle to a [`MemorySession`], used by the async runner.
///
/// Clones refer to the same session. The lock is held only for the duration
/// of a single call.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    id: TransactionId,
    session: Arc<Mutex<MemorySession>>,
}

impl MemoryHandle {
    pub(super) fn new(session: MemorySession) -> Self {
        Self {
            id: session.id(),
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> StoreResult<TransactionState> {
        Ok(self.session.lock()?.state())
    }

    pub fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
        self.session.lock()?.get(table, key)
    }

    pub fn put(
        &self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> StoreResult<()> {
        self.session.lock()?.put(table, key, value)
    }

    pub fn delete(&self, table: impl Into<String>, key: impl Into<String>) -> StoreResult<()> {
        self.session.lock()?.delete(table, key)
    }

    pub(super) fn commit(&self) -> StoreResult<()> {
        self.session.lock()?.commit()
    }

    pub(super) fn rollback(&self) -> StoreResult<()> {
        self.session.lock()?.rollback()
    }
}
