use std::cmp;

use common::{
    backoff::Backoff,
    runtime::Runtime,
};
use errors::ErrorMetadata;
use kv::{
    engine_error,
    KeyValueStore,
    TransactionPriority,
};
use record_store::RecordStore;
use short_future::ShortBoxFuture;

use crate::{
    config::IndexBuildConfig,
    failure::RetryError,
    target::BuildTarget,
};

/// Records per transaction. Only ever shrinks, and outlives any one
/// retried call so later calls start from what earlier ones learned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimit {
    current: u32,
    reductions: u32,
}

impl BatchLimit {
    pub fn new(limit: u32) -> Self {
        Self {
            current: limit,
            reductions: 0,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// How many times the limit has been lessened.
    pub fn reductions(&self) -> u32 {
        self.reductions
    }

    /// Cut the limit to three quarters of its current value, rounding down,
    /// but never below one record.
    pub fn lessen(&mut self) -> u32 {
        self.current = cmp::max(1, (u64::from(self.current) * 3 / 4) as u32);
        self.reductions += 1;
        self.current
    }
}

/// Runs one unit of index-building work in a fresh batch-priority
/// transaction per attempt, lessening the batch limit whenever the engine
/// reports the transaction did too much.
pub(crate) struct AdaptiveRetryRunner<'a, RT: Runtime> {
    runtime: &'a RT,
    db: &'a dyn KeyValueStore,
    target: &'a BuildTarget,
    config: &'a IndexBuildConfig,
}

impl<'a, RT: Runtime> AdaptiveRetryRunner<'a, RT> {
    pub fn new(
        runtime: &'a RT,
        db: &'a dyn KeyValueStore,
        target: &'a BuildTarget,
        config: &'a IndexBuildConfig,
    ) -> Self {
        Self {
            runtime,
            db,
            target,
            config,
        }
    }

    /// Commits `f`'s writes and returns its result. `f` receives the store
    /// for this attempt and the limit to use; it may run several times.
    pub async fn run<'c, T, F>(&self, limit: &mut BatchLimit, f: F) -> Result<T, RetryError>
    where
        T: Send,
        F: for<'b> Fn(&'b mut RecordStore, u32) -> ShortBoxFuture<'b, 'c, anyhow::Result<T>>,
    {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.attempt(limit.current(), &f).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let Some(engine) = engine_error(&error) else {
                return Err(RetryError::Fatal(error));
            };
            if !engine.category.lessens_work() {
                return Err(RetryError::Fatal(error));
            }
            if attempts >= self.config.max_retries {
                tracing::warn!(
                    "Giving up building index {} after {attempts} attempts: {error:#}",
                    self.target.index().name(),
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    source: error,
                });
            }
            let previous = limit.current();
            let lessened = limit.lessen();
            let delay = self.runtime.with_rng(|rng| backoff.fail(rng));
            tracing::info!(
                "Lessening limit of online index build {} from {previous} to {lessened} after \
                 engine error {} ({:?}); retrying in {delay:?}",
                self.target.index().name(),
                engine.code,
                engine.category,
            );
            self.runtime.wait(delay).await;
        }
    }

    async fn attempt<'c, T, F>(&self, limit: u32, f: &F) -> anyhow::Result<T>
    where
        F: for<'b> Fn(&'b mut RecordStore, u32) -> ShortBoxFuture<'b, 'c, anyhow::Result<T>>,
    {
        let mut store = RecordStore::begin(self.db, self.target.config().clone()).await?;
        store
            .transaction()
            .set_priority(TransactionPriority::Batch);
        let index = self.target.index();
        if !store.is_index_write_only(index).await? {
            anyhow::bail!(ErrorMetadata::invalid_index_state(
                "BuildingReadableIndex",
                format!("Attempted to build readable index {}", index.name()),
            ));
        }
        let value = f(&mut store, limit).0.await?;
        store.commit().await?;
        Ok(value)
    }
}
