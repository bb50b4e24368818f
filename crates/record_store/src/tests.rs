use common::{
    interval::Interval,
    tuple,
    tuple::TupleRange,
};
use errors::ErrorMetadataAnyhowExt;
use kv::MemoryKeyValueStore;
use must_let::must_let;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::{
    testing::{
        built_ranges,
        count,
        customer_key,
        indexed_keys,
        mark_write_only,
        order_key,
        save_records,
        test_config,
        typed_metadata,
        CUSTOMER,
        ORDER,
    },
    IndexState,
    IntervalProgressSet,
    RecordStore,
    ScanProperties,
};

#[tokio::test]
async fn test_scan_with_limit_and_continuation() -> anyhow::Result<()> {
    let db = MemoryKeyValueStore::new();
    let config = test_config(typed_metadata()?);
    save_records(&db, &config, ORDER, [1, 2, 3, 5, 8].map(order_key)).await?;
    save_records(&db, &config, CUSTOMER, [1].map(customer_key)).await?;

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    let orders = TupleRange::inclusive(tuple!(1i64), tuple!(1i64));
    let mut seen = vec![];
    let mut continuation = None;
    loop {
        let batch = store
            .scan_records(&orders, continuation.as_deref(), ScanProperties::forward(2))
            .await?;
        seen.push(
            batch
                .records
                .iter()
                .map(|r| r.primary_key.clone())
                .collect::<Vec<_>>(),
        );
        match batch.continuation {
            Some(c) => continuation = Some(c),
            None => break,
        }
    }
    assert_eq!(
        seen,
        vec![
            vec![order_key(1), order_key(2)],
            vec![order_key(3), order_key(5)],
            vec![order_key(8)],
        ]
    );

    let last = store
        .scan_records(&TupleRange::ALL, None, ScanProperties::reverse(1))
        .await?;
    assert_eq!(last.records[0].primary_key, customer_key(1));
    assert_eq!(last.records[0].record_type.name(), CUSTOMER);
    must_let!(let Some(cursor) = last.continuation);
    let before = store
        .scan_records(&TupleRange::ALL, Some(&cursor), ScanProperties::reverse(1))
        .await?;
    assert_eq!(before.records[0].primary_key, order_key(8));
    assert_eq!(before.records[0].value, json!({ "total": 80 }));
    Ok(())
}

#[tokio::test]
async fn test_readable_indexes_follow_writes() -> anyhow::Result<()> {
    let db = MemoryKeyValueStore::new();
    let metadata = typed_metadata()?;
    let config = test_config(metadata.clone());
    let by_total = metadata.index("order_by_total").cloned().unwrap();
    let order_count = metadata.index("order_count").cloned().unwrap();
    let record_count = metadata.index("record_count").cloned().unwrap();

    save_records(&db, &config, ORDER, [1, 2].map(order_key)).await?;
    save_records(&db, &config, CUSTOMER, [1].map(customer_key)).await?;
    // Overwriting is not a new record.
    save_records(&db, &config, ORDER, [2].map(order_key)).await?;
    assert_eq!(count(&db, &config, &order_count).await?, 2);
    assert_eq!(count(&db, &config, &record_count).await?, 3);
    assert_eq!(
        indexed_keys(&db, &config, &by_total).await?,
        vec![order_key(1), order_key(2)]
    );

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    store
        .save_record(ORDER, order_key(1), json!({ "total": 999 }))
        .await?;
    assert!(store.delete_record(&order_key(2)).await?);
    assert!(!store.delete_record(&order_key(2)).await?);
    let entries = store.scan_index(&by_total).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, tuple!(999i64, 1i64, 1i64));
    store.commit().await?;
    assert_eq!(count(&db, &config, &order_count).await?, 1);
    assert_eq!(count(&db, &config, &record_count).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_write_only_index_maintained_inside_built_ranges() -> anyhow::Result<()> {
    let db = MemoryKeyValueStore::new();
    let metadata = typed_metadata()?;
    let config = test_config(metadata.clone());
    let order_count = metadata.index("order_count").cloned().unwrap();
    mark_write_only(&db, &config, &order_count).await?;

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    assert_eq!(store.index_state(&order_count).await?, IndexState::WriteOnly);
    let range_set = store.index_range_set(&order_count);
    let built = TupleRange::between(None, Some(order_key(5))).to_interval();
    assert!(range_set.insert_range(store.transaction(), &built).await?);
    store.commit().await?;

    save_records(&db, &config, ORDER, [1, 4, 5, 9].map(order_key)).await?;
    // Only (1, 1) and (1, 4) fall before (1, 5).
    assert_eq!(count(&db, &config, &order_count).await?, 2);

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    assert!(store.delete_record(&order_key(9)).await?);
    assert!(store.delete_record(&order_key(1)).await?);
    store.commit().await?;
    assert_eq!(count(&db, &config, &order_count).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_index_state_transitions() -> anyhow::Result<()> {
    let db = MemoryKeyValueStore::new();
    let metadata = typed_metadata()?;
    let config = test_config(metadata.clone());
    let by_total = metadata.index("order_by_total").cloned().unwrap();
    save_records(&db, &config, ORDER, [1, 2].map(order_key)).await?;

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    assert_eq!(store.index_state(&by_total).await?, IndexState::Readable);
    assert!(!store.mark_index_readable(&by_total).await?);
    assert!(store.mark_index_write_only(&by_total).await?);
    assert!(!store.mark_index_write_only(&by_total).await?);
    assert!(store.is_index_write_only(&by_total).await?);

    let range_set = store.index_range_set(&by_total);
    range_set
        .insert_range(
            store.transaction(),
            &TupleRange::between(None, Some(order_key(2))).to_interval(),
        )
        .await?;
    let err = store.mark_index_readable(&by_total).await.unwrap_err();
    assert!(err.is_invalid_index_state());
    assert_eq!(err.short_msg(), "IndexNotBuilt");

    range_set
        .insert_range(store.transaction(), &Interval::all())
        .await?;
    assert!(store.mark_index_readable(&by_total).await?);
    assert_eq!(store.index_state(&by_total).await?, IndexState::Readable);

    assert!(store.mark_index_disabled(&by_total).await?);
    assert!(store.scan_index(&by_total).await?.is_empty());
    store.commit().await?;
    assert!(built_ranges(&db, &config, &by_total).await?.is_empty());

    // Disabled indexes see no writes.
    save_records(&db, &config, ORDER, [3].map(order_key)).await?;
    assert!(indexed_keys(&db, &config, &by_total).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_save_rejects_bad_records() -> anyhow::Result<()> {
    let db = MemoryKeyValueStore::new();
    let config = test_config(typed_metadata()?);
    let mut store = RecordStore::begin(&db, config).await?;
    let err = store
        .save_record(ORDER, customer_key(1), json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), "PrimaryKeyMismatch");
    let err = store
        .save_record("Invoice", tuple!(3i64), json!({}))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let saved = store
        .save_record(ORDER, order_key(1), json!({ "total": "lots" }))
        .await?;
    assert_eq!(saved.primary_key, order_key(1));
    let err = store
        .save_record(ORDER, order_key(2), json!({ "total": [1] }))
        .await
        .unwrap_err();
    assert!(err.is_bad_request());
    Ok(())
}
