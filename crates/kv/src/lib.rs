//! The transactional, ordered key-value engine the index builder runs on.
//!
//! Engines report failures as [`EngineError`]s. Each one carries the engine's
//! numeric code and an [`EngineErrorCategory`] resolved once, here, so callers
//! classify failures by matching on the category instead of on raw codes.

use async_trait::async_trait;
use common::interval::{
    BinaryKey,
    Interval,
};

mod memory;

pub use crate::memory::MemoryKeyValueStore;

/// How an engine failure should be handled by a caller that retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineErrorCategory {
    /// The transaction ran past the engine's time limit (1004, 1031).
    TimedOut,
    /// The read version is too old to serve (1007).
    TransactionTooOld,
    /// The transaction conflicted with a concurrent commit (1020).
    NotCommitted,
    /// The transaction read too much for its commit to be checked (2002).
    CommitReadIncomplete,
    /// The transaction wrote more than the engine accepts (2101).
    TransactionTooLarge,
    /// Transient, but not a sign that the transaction was too big.
    Retryable,
    Fatal,
}

impl EngineErrorCategory {
    pub fn from_code(code: i32) -> Self {
        match code {
            1004 | 1031 => Self::TimedOut,
            1007 => Self::TransactionTooOld,
            1020 => Self::NotCommitted,
            2002 => Self::CommitReadIncomplete,
            2101 => Self::TransactionTooLarge,
            1009 | 1021 | 1037 | 1038 | 1213 => Self::Retryable,
            _ => Self::Fatal,
        }
    }

    /// Whether retrying with a smaller transaction is likely to succeed.
    pub fn lessens_work(&self) -> bool {
        match self {
            Self::TimedOut
            | Self::TransactionTooOld
            | Self::NotCommitted
            | Self::CommitReadIncomplete
            | Self::TransactionTooLarge => true,
            Self::Retryable | Self::Fatal => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Engine error {code} ({category:?}): {message}")]
pub struct EngineError {
    pub code: i32,
    pub category: EngineErrorCategory,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            category: EngineErrorCategory::from_code(code),
            message: message.into(),
        }
    }

    pub fn not_committed() -> Self {
        Self::new(1020, "Transaction not committed due to conflict with another transaction")
    }

    pub fn transaction_too_large(size: usize, limit: usize) -> Self {
        Self::new(
            2101,
            format!("Transaction exceeds byte limit: wrote {size} bytes, limit is {limit}"),
        )
    }
}

/// Find the engine error that caused `e`, if any.
pub fn engine_error(e: &anyhow::Error) -> Option<&EngineError> {
    e.chain().find_map(|cause| cause.downcast_ref::<EngineError>())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransactionPriority {
    #[default]
    Default,
    /// Yields to default priority work when the engine is saturated.
    Batch,
    Immediate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeOptions {
    /// Maximum number of rows to return. `None` reads the whole range.
    pub limit: Option<usize>,
    /// Return rows in descending key order.
    pub reverse: bool,
}

impl RangeOptions {
    pub const ALL: RangeOptions = RangeOptions {
        limit: None,
        reverse: false,
    };

    pub fn forward(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            reverse: false,
        }
    }

    pub fn reverse(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            reverse: true,
        }
    }
}

pub type KeyValue = (BinaryKey, Vec<u8>);

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Open a transaction at the latest committed version.
    async fn begin(&self) -> anyhow::Result<Box<dyn KvTransaction>>;
}

/// A serializable transaction. Reads observe the transaction's own writes.
/// Nothing is visible to others until `commit` succeeds.
#[async_trait]
pub trait KvTransaction: Send {
    fn set_priority(&mut self, priority: TransactionPriority);

    fn priority(&self) -> TransactionPriority;

    async fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// Read the rows in `range`, in ascending key order unless
    /// `options.reverse`. With a limit, at most that many rows starting from
    /// the scan's first key.
    async fn get_range(
        &mut self,
        range: &Interval,
        options: RangeOptions,
    ) -> anyhow::Result<Vec<KeyValue>>;

    fn set(&mut self, key: BinaryKey, value: Vec<u8>);

    fn clear(&mut self, key: &[u8]);

    fn clear_range(&mut self, range: &Interval);

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
