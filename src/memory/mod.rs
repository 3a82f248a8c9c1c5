// ============================================================================
// In-Memory Transactional Store
// ============================================================================
//
// A small key/value engine with buffered writes, write-write conflict
// detection and armed faults. It implements both engine seams so runners can
// be driven against a real session lifecycle.
//
// ============================================================================

mod session;

pub use session::{MemoryHandle, MemorySession};

use crate::core::{IsolationLevel, StoreError, StoreResult, TxOptions};
use crate::engine::{AsyncTransactionalEngine, TransactionalEngine};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone)]
struct Versioned {
    /// `None` marks a deleted key
    value: Option<Value>,
    version: u64,
}

/// Failures armed on a [`MemoryStore`]. Each armed fault fires once, on the
/// next matching call, and then disarms itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fail_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Begin,
    Commit,
    Rollback,
}

/// Counters of engine-side effects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub failed_commits: u64,
    /// Sessions dropped while still active
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    failed_commits: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rollback(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed_commit(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            failed_commits: self.failed_commits.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: RwLock<HashMap<String, HashMap<String, Versioned>>>,
    /// Last committed version; only advanced while `tables` is write-locked
    version: AtomicU64,
    faults: Mutex<FaultPlan>,
    stats: Counters,
}

impl StoreInner {
    fn take_fault(&self, fault: Fault) -> StoreResult<bool> {
        let mut plan = self.faults.lock()?;
        let armed = match fault {
            Fault::Begin => &mut plan.fail_begin,
            Fault::Commit => &mut plan.fail_commit,
            Fault::Rollback => &mut plan.fail_rollback,
        };
        Ok(std::mem::take(armed))
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-process transactional key/value store.
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session directly, without going through a runner.
    ///
    /// The store keeps only the latest version of each row, so only
    /// `ReadCommitted` is offered.
    pub fn begin_session(&self, options: &TxOptions) -> StoreResult<MemorySession> {
        if options.isolation_level != IsolationLevel::ReadCommitted {
            return Err(StoreError::UnsupportedIsolation(options.isolation_level));
        }
        if self.inner.take_fault(Fault::Begin)? {
            return Err(StoreError::Injected("begin"));
        }

        let read_version = {
            let _tables = self.inner.tables.read()?;
            self.inner.version.load(Ordering::SeqCst)
        };
        let session = MemorySession::new(
            self.inner.clone(),
            read_version,
            options.read_only,
        );
        self.inner.stats.record_begin();
        debug!(
            "{} started ({}, read_only={}, label={})",
            session.id(),
            options.isolation_level,
            options.read_only,
            options.span_label()
        );
        Ok(session)
    }

    /// Latest committed value of `table.key`
    pub fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
        let tables = self.inner.tables.read()?;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .and_then(|entry| entry.value.clone()))
    }

    /// Committed, non-deleted rows of `table`, ordered by key
    pub fn rows(&self, table: &str) -> StoreResult<BTreeMap<String, Value>> {
        let tables = self.inner.tables.read()?;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|(key, entry)| {
                        entry.value.clone().map(|value| (key.clone(), value))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Arms the given faults, replacing any plan still pending.
    pub fn inject_faults(&self, plan: FaultPlan) -> StoreResult<()> {
        *self.inner.faults.lock()? = plan;
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.stats.snapshot()
    }
}

impl TransactionalEngine for MemoryStore {
    type Session = MemorySession;
    type Error = StoreError;

    fn begin(&self, options: &TxOptions) -> StoreResult<MemorySession> {
        self.begin_session(options)
    }
}

#[async_trait]
impl AsyncTransactionalEngine for MemoryStore {
    type Handle = MemoryHandle;
    type Error = StoreError;

    async fn begin(&self, options: &TxOptions) -> StoreResult<MemoryHandle> {
        self.begin_session(options).map(MemoryHandle::new)
    }

    async fn commit(&self, handle: &MemoryHandle) -> StoreResult<()> {
        handle.commit()
    }

    async fn rollback(&self, handle: &MemoryHandle) -> StoreResult<()> {
        handle.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Session;
    use crate::transaction::TransactionState;
    use serde_json::json;

    fn open(store: &MemoryStore) -> MemorySession {
        store.begin_session(&TxOptions::default()).unwrap()
    }

    #[test]
    fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut session = open(&store);

        session.put("medication", "295", json!({"otc_type": 11})).unwrap();
        assert_eq!(store.get("medication", "295").unwrap(), None);

        Session::commit(&mut session).unwrap();
        assert_eq!(session.state(), TransactionState::Committed);
        assert_eq!(
            store.get("medication", "295").unwrap(),
            Some(json!({"otc_type": 11}))
        );
    }

    #[test]
    fn test_session_reads_its_own_writes() {
        let store = MemoryStore::new();
        let mut session = open(&store);

        session.put("t", "k", json!(1)).unwrap();
        session.put("t", "k", json!(2)).unwrap();
        assert_eq!(session.get("t", "k").unwrap(), Some(json!(2)));

        session.delete("t", "k").unwrap();
        assert_eq!(session.get("t", "k").unwrap(), None);
        assert_eq!(session.change_count(), 3);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut session = open(&store);

        session.put("t", "k", json!("v")).unwrap();
        Session::rollback(&mut session).unwrap();

        assert_eq!(session.state(), TransactionState::Aborted);
        assert_eq!(session.change_count(), 0);
        assert!(store.rows("t").unwrap().is_empty());
    }

    #[test]
    fn test_terminal_session_rejects_everything() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        Session::commit(&mut session).unwrap();

        assert!(matches!(Session::commit(&mut session), Err(StoreError::NotActive { .. })));
        assert!(matches!(Session::rollback(&mut session), Err(StoreError::NotActive { .. })));
        assert!(matches!(
            session.put("t", "k", json!(1)),
            Err(StoreError::NotActive { state: TransactionState::Committed, .. })
        ));
    }

    #[test]
    fn test_read_only_session() {
        let store = MemoryStore::new();
        let mut session = store
            .begin_session(&TxOptions::new().read_only(true))
            .unwrap();

        assert!(session.is_read_only());
        assert!(matches!(
            session.put("t", "k", json!(1)),
            Err(StoreError::ReadOnly(_))
        ));
        Session::commit(&mut session).unwrap();
    }

    #[test]
    fn test_only_read_committed_is_offered() {
        let store = MemoryStore::new();
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ] {
            let err = store
                .begin_session(&TxOptions::new().isolation_level(level))
                .unwrap_err();
            assert!(matches!(err, StoreError::UnsupportedIsolation(l) if l == level));
        }
        assert_eq!(store.stats().begun, 0);

        open(&store);
        assert_eq!(store.stats().begun, 1);
    }

    #[test]
    fn test_session_duration_is_measured_from_begin() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(session.duration() >= std::time::Duration::from_millis(2));
        Session::rollback(&mut session).unwrap();
    }

    #[test]
    fn test_reads_see_latest_committed_value() {
        let store = MemoryStore::new();
        let mut seed = open(&store);
        seed.put("t", "k", json!(1)).unwrap();
        Session::commit(&mut seed).unwrap();

        let reader = open(&store);
        assert_eq!(reader.get("t", "k").unwrap(), Some(json!(1)));

        let mut writer = open(&store);
        writer.put("t", "k", json!(2)).unwrap();
        Session::commit(&mut writer).unwrap();

        assert_eq!(reader.get("t", "k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_write_conflict() {
        let store = MemoryStore::new();
        let mut first = open(&store);
        let mut second = open(&store);

        first.put("accounts", "1", json!(100)).unwrap();
        second.put("accounts", "1", json!(200)).unwrap();

        Session::commit(&mut second).unwrap();
        let err = Session::commit(&mut first).unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { ref key, .. } if key == "1"));

        // still active, so it can be rolled back
        assert_eq!(first.state(), TransactionState::Active);
        Session::rollback(&mut first).unwrap();
        assert_eq!(store.get("accounts", "1").unwrap(), Some(json!(200)));
    }

    #[test]
    fn test_faults_fire_once() {
        let store = MemoryStore::new();
        store
            .inject_faults(FaultPlan::none().fail_begin().fail_commit())
            .unwrap();

        assert!(matches!(
            store.begin_session(&TxOptions::default()),
            Err(StoreError::Injected("begin"))
        ));

        let mut session = open(&store);
        assert!(matches!(Session::commit(&mut session), Err(StoreError::Injected("commit"))));
        Session::commit(&mut session).unwrap();

        let stats = store.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.failed_commits, 1);
    }

    #[test]
    fn test_dropping_active_session_abandons_it() {
        let store = MemoryStore::new();
        {
            let mut session = open(&store);
            session.put("t", "k", json!(1)).unwrap();
        }

        assert!(store.rows("t").unwrap().is_empty());
        assert_eq!(store.stats().abandoned, 1);
        assert_eq!(store.stats().rolled_back, 0);
    }

    #[test]
    fn test_rows_skip_deleted_keys() {
        let store = MemoryStore::new();
        let mut session = open(&store);
        session.put("t", "a", json!(1)).unwrap();
        session.put("t", "b", json!(2)).unwrap();
        Session::commit(&mut session).unwrap();

        let mut session = open(&store);
        session.delete("t", "a").unwrap();
        Session::commit(&mut session).unwrap();

        let rows = store.rows("t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_handle_clones_share_session() {
        let store = MemoryStore::new();
        let handle = MemoryHandle::new(open(&store));
        let other = handle.clone();

        handle.put("t", "k", json!("x")).unwrap();
        assert_eq!(other.get("t", "k").unwrap(), Some(json!("x")));
        assert_eq!(handle.id(), other.id());

        other.commit().unwrap();
        assert_eq!(handle.state().unwrap(), TransactionState::Committed);
    }
}
