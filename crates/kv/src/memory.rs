//! An optimistic, serializable in-memory engine.
//!
//! Every transaction reads from an immutable snapshot of the committed data
//! plus its own buffered writes. At commit, the transaction fails with
//! [`EngineError::not_committed`] if any range it read was written by a
//! transaction that committed after its snapshot was taken.

use std::{
    collections::{
        BTreeMap,
        VecDeque,
    },
    sync::Arc,
};

use async_trait::async_trait;
use common::interval::{
    BinaryKey,
    End,
    Interval,
    IntervalSet,
};
use imbl::OrdMap;
use parking_lot::Mutex;

use crate::{
    EngineError,
    KeyValue,
    KeyValueStore,
    KvTransaction,
    RangeOptions,
    TransactionPriority,
};

/// Number of recent commits remembered for conflict checks. Transactions
/// older than that fail with "transaction too old".
const MAX_CONFLICT_HISTORY: usize = 1024;

#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    data: OrdMap<BinaryKey, Vec<u8>>,
    version: u64,
    /// (commit version, keys written) of recent commits, oldest first.
    recent_writes: VecDeque<(u64, IntervalSet)>,
    injected_failures: VecDeque<i32>,
    transaction_size_limit: Option<usize>,
    commits_by_priority: BTreeMap<TransactionPriority, usize>,
    failed_commits: usize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commits fail with the given engine error codes, one
    /// code per commit, without applying their writes.
    pub fn fail_next_commits(&self, codes: impl IntoIterator<Item = i32>) {
        self.inner.lock().injected_failures.extend(codes);
    }

    /// Commits writing more than `limit` bytes of keys and values fail with
    /// "transaction too large".
    pub fn set_transaction_size_limit(&self, limit: Option<usize>) {
        self.inner.lock().transaction_size_limit = limit;
    }

    pub fn commit_count(&self, priority: TransactionPriority) -> usize {
        self.inner
            .lock()
            .commits_by_priority
            .get(&priority)
            .copied()
            .unwrap_or(0)
    }

    pub fn failed_commits(&self) -> usize {
        self.inner.lock().failed_commits
    }

    /// Injected failures not yet consumed by a commit.
    pub fn pending_failures(&self) -> usize {
        self.inner.lock().injected_failures.len()
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Read committed rows outside of any transaction.
    pub fn scan(&self, range: &Interval) -> Vec<KeyValue> {
        let data = self.inner.lock().data.clone();
        read_range(&data, range, RangeOptions::ALL)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn KvTransaction>> {
        let (view, read_version) = {
            let state = self.inner.lock();
            (state.data.clone(), state.version)
        };
        Ok(Box::new(MemoryTransaction {
            store: self.inner.clone(),
            read_version,
            view,
            mutations: vec![],
            reads: IntervalSet::new(),
            writes: IntervalSet::new(),
            bytes_written: 0,
            priority: TransactionPriority::Default,
        }))
    }
}

enum Mutation {
    Set(BinaryKey, Vec<u8>),
    Clear(BinaryKey),
    ClearRange(Interval),
}

struct MemoryTransaction {
    store: Arc<Mutex<MemoryState>>,
    read_version: u64,
    /// Snapshot at `read_version` with this transaction's writes applied.
    view: OrdMap<BinaryKey, Vec<u8>>,
    mutations: Vec<Mutation>,
    reads: IntervalSet,
    writes: IntervalSet,
    bytes_written: usize,
    priority: TransactionPriority,
}

fn read_range(
    data: &OrdMap<BinaryKey, Vec<u8>>,
    range: &Interval,
    options: RangeOptions,
) -> Vec<KeyValue> {
    if range.is_empty() {
        return vec![];
    }
    let limit = options.limit.unwrap_or(usize::MAX);
    let rows = data.range(range).map(|(k, v)| (k.clone(), v.clone()));
    if options.reverse {
        rows.rev().take(limit).collect()
    } else {
        rows.take(limit).collect()
    }
}

fn clear_view(view: &mut OrdMap<BinaryKey, Vec<u8>>, range: &Interval) {
    if range.is_empty() {
        return;
    }
    let keys: Vec<BinaryKey> = view.range(range).map(|(k, _)| k.clone()).collect();
    for key in keys {
        view.remove(&key);
    }
}

#[async_trait]
impl KvTransaction for MemoryTransaction {
    fn set_priority(&mut self, priority: TransactionPriority) {
        self.priority = priority;
    }

    fn priority(&self) -> TransactionPriority {
        self.priority
    }

    async fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let key = BinaryKey::from(key);
        self.reads.add(Interval::new(
            key.clone(),
            End::Excluded(key.successor()),
        ));
        Ok(self.view.get(&key).cloned())
    }

    async fn get_range(
        &mut self,
        range: &Interval,
        options: RangeOptions,
    ) -> anyhow::Result<Vec<KeyValue>> {
        // Give concurrently running transactions a chance to interleave, as
        // they would against a remote engine.
        tokio::task::yield_now().await;
        let rows = read_range(&self.view, range, options);
        // Only the part of the range up to the last row returned was observed.
        let observed = match (rows.last(), options.limit) {
            (Some((last, _)), Some(limit)) if rows.len() == limit => {
                if options.reverse {
                    range.split_at(last).1
                } else {
                    range.split_at(&last.successor()).0
                }
            },
            _ => range.clone(),
        };
        self.reads.add(observed);
        Ok(rows)
    }

    fn set(&mut self, key: BinaryKey, value: Vec<u8>) {
        self.bytes_written += key.len() + value.len();
        self.writes.add(Interval::new(
            key.clone(),
            End::Excluded(key.successor()),
        ));
        self.view.insert(key.clone(), value.clone());
        self.mutations.push(Mutation::Set(key, value));
    }

    fn clear(&mut self, key: &[u8]) {
        let key = BinaryKey::from(key);
        self.bytes_written += key.len();
        self.writes.add(Interval::new(
            key.clone(),
            End::Excluded(key.successor()),
        ));
        self.view.remove(&key);
        self.mutations.push(Mutation::Clear(key));
    }

    fn clear_range(&mut self, range: &Interval) {
        self.bytes_written += range.start.0.len() + range.end.as_key().map_or(0, |k| k.len());
        self.writes.add(range.clone());
        clear_view(&mut self.view, range);
        self.mutations.push(Mutation::ClearRange(range.clone()));
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let store = self.store.clone();
        let mut state = store.lock();
        if let Some(code) = state.injected_failures.pop_front() {
            state.failed_commits += 1;
            anyhow::bail!(EngineError::new(code, "Injected commit failure"));
        }
        if let Some(limit) = state.transaction_size_limit {
            if self.bytes_written > limit {
                state.failed_commits += 1;
                anyhow::bail!(EngineError::transaction_too_large(
                    self.bytes_written,
                    limit
                ));
            }
        }
        let MemoryTransaction {
            read_version,
            mutations,
            reads,
            writes,
            priority,
            ..
        } = *self;
        if !mutations.is_empty() {
            let oldest_known = state
                .recent_writes
                .front()
                .map(|(version, _)| *version)
                .unwrap_or(state.version + 1);
            if read_version + 1 < oldest_known {
                state.failed_commits += 1;
                anyhow::bail!(EngineError::new(
                    1007,
                    "Transaction is too old to perform reads or be committed"
                ));
            }
            let conflicted = state
                .recent_writes
                .iter()
                .filter(|(version, _)| *version > read_version)
                .any(|(_, written)| reads.iter().any(|read| written.intersects(&read)));
            if conflicted {
                tracing::debug!(
                    "Transaction at version {read_version} conflicted with a later commit"
                );
                state.failed_commits += 1;
                anyhow::bail!(EngineError::not_committed());
            }
            for mutation in mutations {
                match mutation {
                    Mutation::Set(key, value) => {
                        state.data.insert(key, value);
                    },
                    Mutation::Clear(key) => {
                        state.data.remove(&key);
                    },
                    Mutation::ClearRange(range) => clear_view(&mut state.data, &range),
                }
            }
            state.version += 1;
            let version = state.version;
            state.recent_writes.push_back((version, writes));
            while state.recent_writes.len() > MAX_CONFLICT_HISTORY {
                state.recent_writes.pop_front();
            }
        }
        *state.commits_by_priority.entry(priority).or_default() += 1;
        Ok(())
    }
}
