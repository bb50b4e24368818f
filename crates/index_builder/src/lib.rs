//! Builds a secondary index over records that are being written
//! concurrently.
//!
//! The index must be write-only while it is built. Live writes maintain it
//! for records inside ranges already recorded as built, and the builder
//! covers the rest, recording each range it finishes in the index's
//! progress set within the same transaction. Progress therefore survives
//! crashes and is shared with any other builder of the same index.
//!
//! Entry points come in two flavors: `*_in` methods do their work inside a
//! caller-supplied store and never commit, the rest open their own
//! transactions, retry with a shrinking batch limit and throttle
//! themselves.

use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
};

use common::{
    interval::Interval,
    knobs::INDEX_BUILD_PROGRESS_LOG_INTERVAL,
    runtime::{
        Runtime,
        RuntimeInstant,
    },
    tuple::{
        Tuple,
        TupleRange,
    },
};
use errors::ErrorMetadataAnyhowExt;
use kv::KeyValueStore;
use record_store::{
    Index,
    RecordStore,
    RecordStoreConfig,
    RecordType,
};

use crate::{
    retry::AdaptiveRetryRunner,
    target::{
        BuildCounts,
        BuildTarget,
    },
};

mod config;
mod endpoints;
mod failure;
mod materializer;
mod range_builder;
mod rebuild;
mod retry;
mod target;
#[cfg(test)]
mod tests;

pub use crate::{
    config::{
        IndexBuildConfig,
        UNLIMITED,
    },
    failure::{
        RangeAlreadyBuiltError,
        RetryError,
    },
    retry::BatchLimit,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    BuildingEndpoints,
    SweepingInterior,
    MarkingReadable,
    Done,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Idle => "idle",
            BuildState::BuildingEndpoints => "building endpoints",
            BuildState::SweepingInterior => "sweeping interior",
            BuildState::MarkingReadable => "marking readable",
            BuildState::Done => "done",
            BuildState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Work committed by this builder's own transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexBuildStats {
    pub records_scanned: u64,
    pub records_indexed: u64,
    pub ranges_built: u64,
    pub limit_reductions: u32,
}

pub struct OnlineIndexBuilder<RT: Runtime> {
    runtime: RT,
    db: Arc<dyn KeyValueStore>,
    target: BuildTarget,
    config: IndexBuildConfig,
    limit: BatchLimit,
    state: BuildState,
    counts: BuildCounts,
}

impl<RT: Runtime> OnlineIndexBuilder<RT> {
    /// Build `index` from every record type it applies to.
    pub fn new(
        runtime: RT,
        db: Arc<dyn KeyValueStore>,
        store_config: RecordStoreConfig,
        index: Arc<Index>,
        config: IndexBuildConfig,
    ) -> anyhow::Result<Self> {
        Self::with_record_types(runtime, db, store_config, index, None, config)
    }

    /// Build `index` from `record_types` only, or from every record type it
    /// applies to if `None`. The index and record types must come from
    /// `store_config`'s metadata.
    pub fn with_record_types(
        runtime: RT,
        db: Arc<dyn KeyValueStore>,
        store_config: RecordStoreConfig,
        index: Arc<Index>,
        record_types: Option<Vec<Arc<RecordType>>>,
        config: IndexBuildConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let target = BuildTarget::new(store_config, index, record_types)?;
        Ok(Self {
            runtime,
            db,
            target,
            limit: BatchLimit::new(config.limit),
            config,
            state: BuildState::Idle,
            counts: BuildCounts::default(),
        })
    }

    /// The current records-per-transaction limit.
    pub fn limit(&self) -> u32 {
        self.limit.current()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn stats(&self) -> IndexBuildStats {
        IndexBuildStats {
            records_scanned: self.counts.records_scanned,
            records_indexed: self.counts.records_indexed,
            ranges_built: self.counts.ranges_built,
            limit_reductions: self.limit.reductions(),
        }
    }

    pub fn records_range(&self) -> &TupleRange {
        self.target.records_range()
    }

    pub fn index(&self) -> &Arc<Index> {
        self.target.index()
    }

    pub fn config(&self) -> &IndexBuildConfig {
        &self.config
    }

    /// Build `[start, end)` in `store`'s transaction, assuming none of it is
    /// built yet. Returns where the next batch should start (`end` if the
    /// whole range was covered). Fails with `RangeAlreadyBuiltError` if part
    /// of the range was already built.
    pub async fn build_unbuilt_range_in(
        &self,
        store: &mut RecordStore,
        start: Option<&Tuple>,
        end: Option<&Tuple>,
    ) -> anyhow::Result<Option<Tuple>> {
        let range = tuple_interval(start, end);
        let built = self
            .target
            .build_unbuilt_range(store, &range, self.limit.current())
            .await?;
        Ok(built.next_start.or_else(|| end.cloned()))
    }

    /// Like `build_unbuilt_range_in`, but in its own retried transaction.
    pub async fn build_unbuilt_range(
        &mut self,
        start: Option<&Tuple>,
        end: Option<&Tuple>,
    ) -> anyhow::Result<Option<Tuple>> {
        let range = tuple_interval(start, end);
        let target = &self.target;
        let runner =
            AdaptiveRetryRunner::new(&self.runtime, self.db.as_ref(), target, &self.config);
        let built = runner
            .run(&mut self.limit, |store, limit| {
                let range = &range;
                async move { target.build_unbuilt_range(store, range, limit).await }
                    .into()
            })
            .await
            .map_err(RetryError::into_anyhow)?;
        self.counts += built.counts;
        Ok(built.next_start.or_else(|| end.cloned()))
    }

    /// Build whatever part of `[start, end)` is missing, in `store`'s
    /// transaction. Calling it again on the same range does nothing.
    pub async fn build_range_in(
        &self,
        store: &mut RecordStore,
        start: Option<&Tuple>,
        end: Option<&Tuple>,
    ) -> anyhow::Result<()> {
        self.target
            .build_missing_ranges(store, &tuple_interval(start, end), self.limit.current())
            .await?;
        Ok(())
    }

    /// Build whatever part of `[start, end)` is missing across as many
    /// transactions as needed, tolerating concurrent builders.
    pub async fn build_range(
        &mut self,
        start: Option<&Tuple>,
        end: Option<&Tuple>,
    ) -> anyhow::Result<()> {
        self.sweep(tuple_interval(start, end)).await
    }

    /// Build both open-ended tails in `store`'s transaction and return the
    /// interior range left to build.
    pub async fn build_endpoints_in(
        &self,
        store: &mut RecordStore,
    ) -> anyhow::Result<Option<TupleRange>> {
        let (interior, _) = self
            .target
            .build_endpoints(store, self.limit.current())
            .await?;
        Ok(interior)
    }

    /// Like `build_endpoints_in`, but in its own retried transaction.
    pub async fn build_endpoints(&mut self) -> anyhow::Result<Option<TupleRange>> {
        let target = &self.target;
        let runner =
            AdaptiveRetryRunner::new(&self.runtime, self.db.as_ref(), target, &self.config);
        let (interior, counts) = runner
            .run(&mut self.limit, |store, limit| {
                async move { target.build_endpoints(store, limit).await }
                    .into()
            })
            .await
            .map_err(RetryError::into_anyhow)?;
        self.counts += counts;
        Ok(interior)
    }

    /// Clear the index and build it from scratch in `store`'s transaction.
    pub async fn rebuild_index(&self, store: &mut RecordStore) -> anyhow::Result<()> {
        let counts = self
            .target
            .rebuild_index(store, self.limit.current())
            .await?;
        tracing::info!(
            "Rebuilt index {}: {} records indexed",
            self.index().name(),
            counts.records_indexed
        );
        Ok(())
    }

    /// Build the whole index online: the endpoints first, then the interior,
    /// then optionally mark the index readable in a transaction of its own.
    pub async fn build_index(&mut self, mark_readable: bool) -> anyhow::Result<()> {
        match self.run_build(mark_readable).await {
            Ok(()) => {
                self.transition(BuildState::Done);
                Ok(())
            },
            Err(e) => {
                self.transition(BuildState::Failed);
                Err(e)
            },
        }
    }

    async fn run_build(&mut self, mark_readable: bool) -> anyhow::Result<()> {
        self.transition(BuildState::BuildingEndpoints);
        let interior = self.build_endpoints().await?;
        self.transition(BuildState::SweepingInterior);
        if let Some(interior) = interior {
            self.sweep(interior.to_interval()).await?;
        }
        if mark_readable {
            self.transition(BuildState::MarkingReadable);
            let mut store =
                RecordStore::begin(self.db.as_ref(), self.target.config().clone()).await?;
            store.mark_index_readable(self.index()).await?;
            store.commit().await?;
        }
        Ok(())
    }

    fn transition(&mut self, state: BuildState) {
        tracing::info!(
            "Online build of index {}: {} -> {state}",
            self.index().name(),
            self.state
        );
        self.state = state;
    }

    /// The gaps of `range`, read in a transaction that is never committed.
    async fn missing_ranges(&self, range: &Interval) -> anyhow::Result<Vec<Interval>> {
        let mut store = RecordStore::begin(self.db.as_ref(), self.target.config().clone()).await?;
        self.target
            .progress()
            .missing_ranges(store.transaction(), range)
            .await
    }

    async fn sweep(&mut self, range: Interval) -> anyhow::Result<()> {
        let mut queue: VecDeque<Interval> = self.missing_ranges(&range).await?.into();
        let mut last_logged = self.runtime.monotonic_now();
        let mut last_logged_count = self.counts.records_indexed;
        while let Some(to_build) = queue.pop_front() {
            let target = &self.target;
            let runner =
                AdaptiveRetryRunner::new(&self.runtime, self.db.as_ref(), target, &self.config);
            let result = runner
                .run(&mut self.limit, |store, limit| {
                    let to_build = &to_build;
                    async move { target.build_unbuilt_range(store, to_build, limit).await }
                        .into()
                })
                .await
                .map_err(RetryError::into_anyhow);
            let delay = self.config.throttle_delay(self.limit.current());
            match result {
                Ok(built) => {
                    self.counts += built.counts;
                    if let Some(next) = built.next_start {
                        queue.push_back(Interval::new(next.pack(), to_build.end.clone()));
                    }
                },
                Err(e) if e.is_range_already_built() => {
                    tracing::debug!(
                        "{to_build:?} of index {} was built concurrently, rechecking",
                        self.index().name()
                    );
                    queue.extend(self.missing_ranges(&to_build).await?);
                },
                Err(e) => {
                    tracing::warn!(
                        "Possibly non-fatal error encountered building range {to_build:?} of \
                         index {}: {e:#}",
                        self.index().name()
                    );
                    return Err(e);
                },
            }
            if !delay.is_zero() {
                self.runtime.wait(delay).await;
            }
            if last_logged.elapsed() >= *INDEX_BUILD_PROGRESS_LOG_INTERVAL {
                tracing::info!(
                    "Indexed {} records for index {} ({} since last report), limit {}, {} \
                     ranges queued",
                    self.counts.records_indexed,
                    self.index().name(),
                    self.counts.records_indexed - last_logged_count,
                    self.limit.current(),
                    queue.len(),
                );
                last_logged = self.runtime.monotonic_now();
                last_logged_count = self.counts.records_indexed;
            }
        }
        Ok(())
    }
}

fn tuple_interval(start: Option<&Tuple>, end: Option<&Tuple>) -> Interval {
    TupleRange::between(start.cloned(), end.cloned()).to_interval()
}
