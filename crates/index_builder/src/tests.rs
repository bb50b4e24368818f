use std::{
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use cmd_util::env::{
    config_test,
    env_config,
};
use common::{
    interval::{
        End,
        Interval,
    },
    runtime::testing::{
        TestDriver,
        TestRuntime,
    },
    tuple::{
        EndpointType,
        Tuple,
        TupleRange,
    },
};
use errors::ErrorMetadataAnyhowExt;
use kv::{
    engine_error,
    KvTransaction,
    MemoryKeyValueStore,
    TransactionPriority,
};
use must_let::must_let;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use record_store::{
    testing::{
        built_ranges,
        count,
        customer_key,
        indexed_keys,
        item_key,
        mark_write_only,
        order_key,
        save_records,
        test_config,
        typed_metadata,
        untyped_metadata,
        CUSTOMER,
        ITEM,
        ORDER,
    },
    Index,
    IndexState,
    IntervalProgressSet,
    RangeSet,
    RecordMetadata,
    RecordStore,
    RecordStoreConfig,
};

use crate::{
    retry::AdaptiveRetryRunner,
    target::BuildTarget,
    BatchLimit,
    BuildState,
    IndexBuildConfig,
    OnlineIndexBuilder,
    RangeAlreadyBuiltError,
    RetryError,
    UNLIMITED,
};

const SCENARIO_KEYS: [i64; 5] = [1, 2, 3, 5, 8];

fn build_config(limit: u32) -> IndexBuildConfig {
    IndexBuildConfig {
        limit,
        max_retries: 10,
        records_per_second: UNLIMITED,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
    }
}

struct Items {
    db: MemoryKeyValueStore,
    config: RecordStoreConfig,
    metadata: Arc<RecordMetadata>,
    count_index: Arc<Index>,
    value_index: Arc<Index>,
}

impl Items {
    /// A store of untyped items whose indexes were added in write-only mode
    /// before `keys` were written.
    async fn new(keys: &[i64]) -> anyhow::Result<Self> {
        config_test();
        let db = MemoryKeyValueStore::new();
        let metadata = untyped_metadata()?;
        let config = test_config(metadata.clone());
        let count_index = metadata.index("item_count").cloned().unwrap();
        let value_index = metadata.index("item_by_total").cloned().unwrap();
        mark_write_only(&db, &config, &count_index).await?;
        mark_write_only(&db, &config, &value_index).await?;
        save_records(&db, &config, ITEM, keys.iter().map(|k| item_key(*k))).await?;
        Ok(Self {
            db,
            config,
            metadata,
            count_index,
            value_index,
        })
    }

    fn builder(
        &self,
        rt: &TestRuntime,
        index: &Arc<Index>,
        config: IndexBuildConfig,
    ) -> anyhow::Result<OnlineIndexBuilder<TestRuntime>> {
        OnlineIndexBuilder::new(
            rt.clone(),
            Arc::new(self.db.clone()),
            self.config.clone(),
            index.clone(),
            config,
        )
    }

    async fn count(&self) -> anyhow::Result<i64> {
        count(&self.db, &self.config, &self.count_index).await
    }

    async fn missing(&self, index: &Index, range: &Interval) -> anyhow::Result<Vec<Interval>> {
        let mut store = RecordStore::begin(&self.db, self.config.clone()).await?;
        let range_set = store.index_range_set(index);
        range_set.missing_ranges(store.transaction(), range).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_store_builds_everything_at_once() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&[]).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(10))?;

    assert_eq!(builder.build_endpoints().await?, None);
    assert!(items
        .missing(&items.count_index, &Interval::all())
        .await?
        .is_empty());
    assert_eq!(
        built_ranges(&items.db, &items.config, &items.count_index).await?,
        vec![Interval::all()]
    );

    builder.build_index(true).await?;
    assert_eq!(builder.state(), BuildState::Done);
    assert_eq!(builder.stats().records_indexed, 0);
    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    assert_eq!(store.index_state(&items.count_index).await?, IndexState::Readable);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sweep_batches_by_limit() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(2))?;

    builder.build_range(None, None).await?;
    let stats = builder.stats();
    // {1, 2}, {3, 5}, {8}
    assert_eq!(stats.ranges_built, 3);
    assert_eq!(stats.records_scanned, 5);
    assert_eq!(stats.records_indexed, 5);
    assert_eq!(items.db.commit_count(TransactionPriority::Batch), 3);
    assert_eq!(items.count().await?, 5);
    assert_eq!(
        built_ranges(&items.db, &items.config, &items.count_index).await?,
        vec![Interval::all()]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_build_index_end_to_end() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut builder = items.builder(&rt, &items.value_index, build_config(2))?;
    assert_eq!(builder.state(), BuildState::Idle);
    assert!(builder.records_range().is_all());

    builder.build_index(true).await?;
    assert_eq!(builder.state(), BuildState::Done);
    let stats = builder.stats();
    // Both tails (the second holding record 8), then {1, 2} and {3, 5}.
    assert_eq!(stats.ranges_built, 4);
    assert_eq!(stats.records_indexed, 5);
    assert_eq!(
        indexed_keys(&items.db, &items.config, &items.value_index).await?,
        SCENARIO_KEYS.map(item_key).to_vec()
    );
    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    assert_eq!(store.index_state(&items.value_index).await?, IndexState::Readable);
    // Only the value index was built.
    assert!(store.is_index_write_only(&items.count_index).await?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_build_range_is_idempotent() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(2))?;

    builder.build_range(None, None).await?;
    let after_first = builder.stats();
    let commits = items.db.commit_count(TransactionPriority::Batch);
    builder.build_range(None, None).await?;
    assert_eq!(builder.stats(), after_first);
    assert_eq!(items.db.commit_count(TransactionPriority::Batch), commits);
    assert_eq!(items.count().await?, 5);

    // The same holds inside one transaction.
    let other = Items::new(&SCENARIO_KEYS).await?;
    let builder = other.builder(&rt, &other.count_index, build_config(2))?;
    let mut store = RecordStore::begin(&other.db, other.config.clone()).await?;
    builder.build_range_in(&mut store, None, None).await?;
    builder.build_range_in(&mut store, None, None).await?;
    store.commit().await?;
    assert_eq!(other.count().await?, 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resumed_build_only_fills_gaps() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(10))?;

    builder
        .build_range(Some(&item_key(1)), Some(&item_key(5)))
        .await?;
    assert_eq!(builder.stats().records_indexed, 3);

    // A separate builder picks up after an interruption.
    let mut resumed = items.builder(&rt, &items.count_index, build_config(10))?;
    resumed
        .build_range(Some(&item_key(0)), Some(&item_key(10)))
        .await?;
    assert_eq!(resumed.stats().records_indexed, 2);
    assert_eq!(resumed.stats().ranges_built, 2);
    assert_eq!(items.count().await?, 5);
    assert_eq!(
        built_ranges(&items.db, &items.config, &items.count_index).await?,
        vec![Interval::new(item_key(0).pack(), End::Excluded(item_key(10).pack()))]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_unbuilt_builds_race() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut first = items.builder(&rt, &items.count_index, build_config(UNLIMITED))?;
    let mut second = items.builder(&rt, &items.count_index, build_config(UNLIMITED))?;

    let (a, b) = futures::join!(
        first.build_unbuilt_range(None, None),
        second.build_unbuilt_range(None, None),
    );
    let error = match (a, b) {
        (Ok(end), Err(e)) | (Err(e), Ok(end)) => {
            assert_eq!(end, None);
            e
        },
        (a, b) => panic!("Expected exactly one success: {a:?} {b:?}"),
    };
    assert!(error.is_range_already_built());
    must_let!(let Some(race) = error.downcast_ref::<RangeAlreadyBuiltError>());
    assert_eq!(race.range, Interval::all());
    assert_eq!(items.count().await?, 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unbuilt_range_in_detects_overlap() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let builder = items.builder(&rt, &items.count_index, build_config(2))?;

    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    let next = builder
        .build_unbuilt_range_in(&mut store, Some(&item_key(1)), Some(&item_key(8)))
        .await?;
    assert_eq!(next, Some(item_key(3)));
    let next = builder
        .build_unbuilt_range_in(&mut store, Some(&item_key(3)), Some(&item_key(4)))
        .await?;
    assert_eq!(next, Some(item_key(4)));
    let err = builder
        .build_unbuilt_range_in(&mut store, Some(&item_key(2)), Some(&item_key(6)))
        .await
        .unwrap_err();
    must_let!(let Some(race) = err.downcast_ref::<RangeAlreadyBuiltError>());
    assert_eq!(
        race.range,
        TupleRange::between(Some(item_key(2)), Some(item_key(6))).to_interval()
    );
    Ok(())
}

/// Reports every range as missing, so only the final insert can notice that
/// the progress set already covers it.
struct StaleProgress(RangeSet);

#[async_trait]
impl IntervalProgressSet for StaleProgress {
    async fn missing_ranges(
        &self,
        _tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<Vec<Interval>> {
        Ok(vec![range.clone()])
    }

    async fn insert_range(
        &self,
        tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<bool> {
        self.0.insert_range(tx, range).await
    }

    async fn clear(&self, tx: &mut dyn KvTransaction) -> anyhow::Result<()> {
        self.0.clear(tx).await
    }
}

#[tokio::test]
async fn test_unbuilt_range_fails_when_insert_finds_range_covered() -> anyhow::Result<()> {
    let items = Items::new(&SCENARIO_KEYS).await?;
    let range_set = items.config.index_range_set(&items.count_index);
    let target = BuildTarget::new(items.config.clone(), items.count_index.clone(), None)?
        .with_progress(Arc::new(StaleProgress(range_set.clone())));

    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    range_set
        .insert_range(store.transaction(), &Interval::all())
        .await?;
    let range = TupleRange::between(Some(item_key(1)), Some(item_key(4))).to_interval();
    let err = target
        .build_unbuilt_range(&mut store, &range, 2)
        .await
        .unwrap_err();
    assert!(err.is_range_already_built());
    must_let!(let Some(race) = err.downcast_ref::<RangeAlreadyBuiltError>());
    assert_eq!(race.range, range);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sweeps_recover_from_races() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let keys: Vec<i64> = (1..=20).collect();
    let items = Items::new(&keys).await?;
    let mut a = items.builder(&rt, &items.count_index, build_config(3))?;
    let mut b = items.builder(&rt, &items.count_index, build_config(3))?;

    let (built_a, built_b) = futures::join!(a.build_range(None, None), b.build_range(None, None));
    built_a?;
    built_b?;

    // Batches that lost a race were never committed, so nothing is counted
    // twice.
    assert_eq!(items.count().await?, 20);
    assert_eq!(a.stats().records_indexed + b.stats().records_indexed, 20);
    assert_eq!(
        built_ranges(&items.db, &items.config, &items.count_index).await?,
        vec![Interval::all()]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_limit_shrinks_on_lessen_work_errors() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(100))?;

    items.db.fail_next_commits([2101, 1007, 1004]);
    builder.build_unbuilt_range(None, None).await?;
    assert_eq!(builder.limit(), 42);
    assert_eq!(builder.stats().limit_reductions, 3);
    assert_eq!(builder.stats().records_indexed, 5);
    assert_eq!(items.count().await?, 5);
    // Backoff slept between attempts.
    assert!(rt.elapsed() > Duration::ZERO);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let config = IndexBuildConfig {
        max_retries: 3,
        ..build_config(100)
    };
    let mut builder = items.builder(&rt, &items.count_index, config)?;

    items.db.fail_next_commits([1020, 1020, 1020, 1020]);
    let err = builder.build_unbuilt_range(None, None).await.unwrap_err();
    must_let!(let Some(engine) = engine_error(&err));
    assert_eq!(engine.code, 1020);
    assert!(err.to_string().contains("gave up after 3 attempts"));
    assert_eq!(items.db.pending_failures(), 1);
    // Lessened after the first two attempts only.
    assert_eq!(builder.limit(), 56);
    assert_eq!(items.count().await?, 0);

    // The learned limit carries into the next call.
    builder.build_unbuilt_range(None, None).await?;
    assert_eq!(builder.limit(), 42);
    assert_eq!(items.count().await?, 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_runner_results() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&[]).await?;
    let target = BuildTarget::new(items.config.clone(), items.count_index.clone(), None)?;
    let config = IndexBuildConfig {
        max_retries: 3,
        ..build_config(8)
    };
    let runner = AdaptiveRetryRunner::new(&rt, &items.db, &target, &config);

    items.db.fail_next_commits([1031, 1031, 1031]);
    let mut limit = BatchLimit::new(8);
    let result: Result<(), RetryError> = runner
        .run(&mut limit, |_store, _limit| async { Ok(()) }.into())
        .await;
    assert!(matches!(
        result,
        Err(RetryError::Exhausted { attempts: 3, .. })
    ));
    assert_eq!(limit.current(), 4);

    // Not a lessen-work code: surfaced without retrying.
    items.db.fail_next_commits([1009, 1009]);
    let mut limit = BatchLimit::new(8);
    let result: Result<(), RetryError> = runner
        .run(&mut limit, |_store, _limit| async { Ok(()) }.into())
        .await;
    must_let!(let Err(RetryError::Fatal(e)) = result);
    assert_eq!(engine_error(&e).map(|e| e.code), Some(1009));
    assert_eq!(items.db.pending_failures(), 1);
    assert_eq!(limit, BatchLimit::new(8));

    // Errors without an engine code are not retried either.
    let attempts = AtomicUsize::new(0);
    let result: Result<(), RetryError> = runner
        .run(&mut limit, |_store, _limit| {
            let attempts = &attempts;
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("index maintainer failed"))
            }
            .into()
        })
        .await;
    must_let!(let Err(RetryError::Fatal(_)) = result);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_building_readable_index_is_fatal() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let db = MemoryKeyValueStore::new();
    let metadata = untyped_metadata()?;
    let config = test_config(metadata.clone());
    save_records(&db, &config, ITEM, SCENARIO_KEYS.map(item_key)).await?;
    let index = metadata.index("item_count").cloned().unwrap();

    let mut builder = OnlineIndexBuilder::new(
        rt,
        Arc::new(db.clone()),
        config,
        index,
        build_config(10),
    )?;
    let err = builder.build_index(false).await.unwrap_err();
    assert!(err.is_invalid_index_state());
    assert_eq!(err.short_msg(), "BuildingReadableIndex");
    assert_eq!(builder.state(), BuildState::Failed);
    assert_eq!(db.commit_count(TransactionPriority::Batch), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_construction() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&[]).await?;
    let err = items
        .builder(&rt, &items.count_index, build_config(0))
        .err()
        .unwrap();
    assert!(err.is_bad_request());

    let stale = untyped_metadata()?;
    let stale_index = stale.index("item_count").cloned().unwrap();
    let err = items
        .builder(&rt, &stale_index, build_config(10))
        .err()
        .unwrap();
    assert!(err.is_metadata_mismatch());

    // A store opened with other metadata is rejected too.
    let builder = items.builder(&rt, &items.count_index, build_config(10))?;
    let mut store = RecordStore::begin(&items.db, test_config(stale)).await?;
    let err = builder
        .build_range_in(&mut store, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), "StoreMetadataMismatch");
    assert!(Arc::ptr_eq(&items.metadata, &builder.target.config().metadata));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_endpoints_skip_other_record_types() -> anyhow::Result<()> {
    config_test();
    let rt = TestRuntime::new();
    let db = MemoryKeyValueStore::new();
    let metadata = typed_metadata()?;
    let config = test_config(metadata.clone());
    let order_count = metadata.index("order_count").cloned().unwrap();
    mark_write_only(&db, &config, &order_count).await?;
    save_records(&db, &config, ORDER, [1, 2, 3].map(order_key)).await?;
    save_records(&db, &config, CUSTOMER, [1, 2].map(customer_key)).await?;

    let mut builder = OnlineIndexBuilder::new(
        rt,
        Arc::new(db.clone()),
        config.clone(),
        order_count.clone(),
        build_config(10),
    )?;
    assert_eq!(
        *builder.records_range(),
        TupleRange::inclusive(common::tuple!(1i64), common::tuple!(1i64))
    );
    let interior = builder.build_endpoints().await?;
    assert_eq!(
        interior,
        Some(TupleRange::new(
            Some(order_key(1)),
            Some(order_key(3)),
            EndpointType::RangeInclusive,
            EndpointType::RangeExclusive,
        ))
    );
    assert_eq!(
        built_ranges(&db, &config, &order_count).await?,
        vec![
            TupleRange::between(None, Some(order_key(1))).to_interval(),
            TupleRange::between(Some(order_key(3)), None).to_interval(),
        ]
    );
    assert_eq!(count(&db, &config, &order_count).await?, 1);

    builder.build_index(true).await?;
    assert_eq!(count(&db, &config, &order_count).await?, 3);
    assert_eq!(builder.stats().records_indexed, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rebuild_index() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    // Build partially, then throw the progress away with a rebuild.
    let mut builder = items.builder(&rt, &items.count_index, build_config(2))?;
    builder
        .build_range(Some(&item_key(0)), Some(&item_key(3)))
        .await?;
    assert_eq!(items.count().await?, 2);

    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    builder.rebuild_index(&mut store).await?;
    store.commit().await?;
    assert_eq!(items.count().await?, 5);
    assert_eq!(
        built_ranges(&items.db, &items.config, &items.count_index).await?,
        vec![Interval::all()]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_endpoint_range_marks_unscanned_records_built() -> anyhow::Result<()> {
    let items = Items::new(&[1, 2, 3]).await?;
    let target = BuildTarget::new(items.config.clone(), items.count_index.clone(), None)?;
    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    let counts = target
        .build_endpoint_range(&mut store, &Interval::all(), 1)
        .await?;
    store.commit().await?;
    // The whole range is recorded as built although the scan stopped after
    // one record.
    assert_eq!(counts.records_indexed, 1);
    assert!(items
        .missing(&items.count_index, &Interval::all())
        .await?
        .is_empty());
    assert_eq!(items.count().await?, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sweep_throttles() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let items = Items::new(&SCENARIO_KEYS).await?;
    let config = IndexBuildConfig {
        records_per_second: 1,
        ..build_config(2)
    };
    let mut builder = items.builder(&rt, &items.count_index, config)?;
    let start = rt.elapsed();
    builder.build_range(None, None).await?;
    // Three batches of two records at one record per second.
    assert!(rt.elapsed() - start >= Duration::from_secs(6));
    assert_eq!(items.count().await?, 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_writes_during_build() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let keys: Vec<i64> = (1..=10).collect();
    let items = Items::new(&keys).await?;
    let mut builder = items.builder(&rt, &items.count_index, build_config(3))?;

    builder.build_range(None, Some(&item_key(5))).await?;
    assert_eq!(items.count().await?, 4);

    // 0 and 2 land in the built range and are maintained live; 6 and 11 are
    // left to the builder.
    save_records(
        &items.db,
        &items.config,
        ITEM,
        [0, 2, 6, 11].map(item_key),
    )
    .await?;
    assert_eq!(items.count().await?, 5);

    builder.build_range(None, None).await?;
    assert_eq!(items.count().await?, 12);

    let mut store = RecordStore::begin(&items.db, items.config.clone()).await?;
    assert!(store.delete_record(&item_key(3)).await?);
    assert!(store.delete_record(&item_key(9)).await?);
    store.commit().await?;
    assert_eq!(items.count().await?, 10);
    Ok(())
}

#[test]
fn test_limit_shrinks_from_current_value() {
    let mut limit = BatchLimit::new(13);
    assert_eq!(limit.lessen(), 9);
    // floor(9 * 3 / 4), rounded down again at every step
    assert_eq!(limit.lessen(), 6);
    assert_eq!(limit.lessen(), 4);
    assert_eq!(limit.lessen(), 3);
    assert_eq!(limit.lessen(), 2);
    assert_eq!(limit.lessen(), 1);
    assert_eq!(limit.lessen(), 1);
    assert_eq!(limit.reductions(), 7);

    let mut limit = BatchLimit::new(UNLIMITED);
    for _ in 0..200 {
        limit.lessen();
    }
    assert_eq!(limit.current(), 1);
    assert_eq!(limit.reductions(), 200);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32 * env_config("PROPTEST_MULTIPLIER", 1),
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn proptest_limit_shrinks_geometrically(start in 1u32..=UNLIMITED, failures in 0u32..100) {
        let mut limit = BatchLimit::new(start);
        for _ in 0..failures {
            let previous = limit.current();
            let lessened = limit.lessen();
            prop_assert_eq!(u64::from(lessened), std::cmp::max(1, u64::from(previous) * 3 / 4));
            prop_assert!(lessened <= previous);
            prop_assert!(lessened >= 1);
            prop_assert!(lessened < previous || previous == 1);
        }
        prop_assert_eq!(limit.reductions(), failures);
        if failures >= 78 {
            prop_assert_eq!(limit.current(), 1);
        }
    }

    #[test]
    fn proptest_sub_range_builds_cover_everything(
        keys in prop::collection::btree_set(0i64..40, 0..25),
        splits in prop::collection::btree_set(0i64..40, 0..6),
        order in any::<u64>(),
        limit in 1u32..5,
    ) {
        let td = TestDriver::new();
        let rt = td.rt();
        let keys: Vec<i64> = keys.into_iter().collect();
        let result: anyhow::Result<(i64, Vec<Interval>)> = td.run_until(async {
            let items = Items::new(&keys).await?;
            let mut builder = items.builder(&rt, &items.count_index, build_config(limit))?;
            let mut bounds: Vec<Option<Tuple>> = vec![None];
            bounds.extend(splits.iter().map(|s| Some(item_key(*s))));
            bounds.push(None);
            let mut ranges: Vec<(Option<Tuple>, Option<Tuple>)> = bounds
                .windows(2)
                .map(|w| (w[0].clone(), w[1].clone()))
                .collect();
            // Build the pieces in a scrambled order.
            let len = ranges.len();
            ranges.rotate_left((order % len as u64) as usize);
            for (start, end) in &ranges {
                builder.build_range(start.as_ref(), end.as_ref()).await?;
            }
            let built = built_ranges(&items.db, &items.config, &items.count_index).await?;
            Ok((items.count().await?, built))
        });
        let (indexed, built) = result.map_err(|e| TestCaseError::fail(format!("{e:#}")))?;
        prop_assert_eq!(indexed, keys.len() as i64);
        prop_assert_eq!(built, vec![Interval::all()]);
    }
}
