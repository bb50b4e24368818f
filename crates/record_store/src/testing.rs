use std::sync::Arc;

use common::{
    interval::Interval,
    tuple,
    tuple::{
        Subspace,
        Tuple,
        TupleElement,
    },
};
use kv::KeyValueStore;
use serde_json::json;

use crate::{
    metadata::{
        Index,
        RecordMetadata,
    },
    RecordStore,
    RecordStoreConfig,
};

pub const ORDER: &str = "Order";
pub const CUSTOMER: &str = "Customer";
pub const ITEM: &str = "Item";

/// Orders keyed `(1, id)` and customers keyed `(2, id)`, with a value index
/// and a count index over orders and a count index over everything.
pub fn typed_metadata() -> anyhow::Result<Arc<RecordMetadata>> {
    RecordMetadata::builder()
        .add_record_type(ORDER, Some(1i64.into()))
        .add_record_type(CUSTOMER, Some(2i64.into()))
        .add_index(Index::value("order_by_total", "total").on_record_types([ORDER]))
        .add_index(Index::count("order_count").on_record_types([ORDER]))
        .add_index(Index::count("record_count"))
        .build()
}

/// A single record type whose keys carry no type prefix.
pub fn untyped_metadata() -> anyhow::Result<Arc<RecordMetadata>> {
    RecordMetadata::builder()
        .add_record_type(ITEM, None)
        .add_index(Index::value("item_by_total", "total"))
        .add_index(Index::count("item_count"))
        .build()
}

pub fn test_config(metadata: Arc<RecordMetadata>) -> RecordStoreConfig {
    RecordStoreConfig::new(Subspace::new(&tuple!("test_store")), metadata)
}

pub fn order_key(id: i64) -> Tuple {
    tuple!(1i64, id)
}

pub fn customer_key(id: i64) -> Tuple {
    tuple!(2i64, id)
}

pub fn item_key(id: i64) -> Tuple {
    tuple!(id)
}

/// Save one record per key in a single transaction. Each record's `total`
/// is ten times its last key element.
pub async fn save_records(
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    record_type: &str,
    keys: impl IntoIterator<Item = Tuple>,
) -> anyhow::Result<()> {
    let mut store = RecordStore::begin(db, config.clone()).await?;
    for key in keys {
        let total = match key.elements().last() {
            Some(TupleElement::Int(i)) => *i * 10,
            _ => 0,
        };
        store
            .save_record(record_type, key, json!({ "total": total }))
            .await?;
    }
    store.commit().await
}

pub async fn mark_write_only(
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    index: &Index,
) -> anyhow::Result<()> {
    let mut store = RecordStore::begin(db, config.clone()).await?;
    store.mark_index_write_only(index).await?;
    store.commit().await
}

/// The primary keys covered by a value index, in index order.
pub async fn indexed_keys(
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    index: &Index,
) -> anyhow::Result<Vec<Tuple>> {
    let mut store = RecordStore::begin(db, config.clone()).await?;
    let entries = store.scan_index(index).await?;
    Ok(entries
        .into_iter()
        .map(|(entry, _)| Tuple(entry.elements()[1..].to_vec()))
        .collect())
}

pub async fn count(
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    index: &Index,
) -> anyhow::Result<i64> {
    let mut store = RecordStore::begin(db, config.clone()).await?;
    store.index_count(index).await
}

pub async fn built_ranges(
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    index: &Index,
) -> anyhow::Result<Vec<Interval>> {
    let mut store = RecordStore::begin(db, config.clone()).await?;
    let range_set = store.index_range_set(index);
    range_set.built_ranges(store.transaction()).await
}
