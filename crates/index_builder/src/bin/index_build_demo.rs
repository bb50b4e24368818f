//! Builds a count index and a value index online over an in-memory store
//! while another task keeps writing records, then checks the count.
use std::{
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use cmd_util::env::config_tool;
use common::{
    runtime::Runtime,
    tuple,
    tuple::Subspace,
};
use index_builder::{
    IndexBuildConfig,
    OnlineIndexBuilder,
};
use kv::{
    KeyValueStore,
    MemoryKeyValueStore,
};
use rand::Rng;
use record_store::{
    Index,
    RecordMetadata,
    RecordStore,
    RecordStoreConfig,
};
use runtime::prod::ProdRuntime;
use serde_json::json;

const ITEM: &str = "Item";

#[derive(Parser)]
#[command(about = "Build secondary indexes online over a busy in-memory store")]
struct Args {
    /// Records written before the build starts.
    #[arg(long, default_value = "10000")]
    records: i64,

    /// Records written by a concurrent writer while the build runs.
    #[arg(long, default_value = "1000")]
    concurrent_writes: i64,

    /// Initial number of records per build transaction.
    #[arg(long)]
    limit: Option<u32>,

    /// Build throughput cap.
    #[arg(long)]
    records_per_second: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    config_tool();
    let tokio = ProdRuntime::init_tokio()?;
    let rt = ProdRuntime::new(&tokio);
    rt.block_on(run(rt.clone(), args))
}

async fn run(rt: ProdRuntime, args: Args) -> anyhow::Result<()> {
    let metadata = RecordMetadata::builder()
        .add_record_type(ITEM, None)
        .add_index(Index::count("item_count"))
        .add_index(Index::value("item_by_total", "total"))
        .build()?;
    let config = RecordStoreConfig::new(Subspace::new(&tuple!("demo")), metadata.clone());
    let db = MemoryKeyValueStore::new();

    let mut store = RecordStore::begin(&db, config.clone()).await?;
    for index in metadata.indexes() {
        store.mark_index_write_only(index).await?;
    }
    store.commit().await?;
    for chunk in (0..args.records).collect::<Vec<_>>().chunks(500) {
        let mut store = RecordStore::begin(&db, config.clone()).await?;
        for id in chunk {
            store
                .save_record(ITEM, tuple!(*id), json!({ "total": id % 97 }))
                .await?;
        }
        store.commit().await?;
    }

    let mut build_config = IndexBuildConfig::default();
    if let Some(limit) = args.limit {
        build_config.limit = limit;
    }
    if let Some(rps) = args.records_per_second {
        build_config.records_per_second = rps;
    }

    let db: Arc<dyn KeyValueStore> = Arc::new(db);
    let mut builders = metadata
        .indexes()
        .map(|index| {
            OnlineIndexBuilder::new(
                rt.clone(),
                db.clone(),
                config.clone(),
                index.clone(),
                build_config.clone(),
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let builds = futures::future::try_join_all(
        builders
            .iter_mut()
            .map(|builder| builder.build_index(true)),
    );
    let writes = write_concurrently(
        &rt,
        db.as_ref(),
        &config,
        args.records,
        args.concurrent_writes,
    );
    let (built, written) = futures::join!(builds, writes);
    built?;
    let written = written?;

    for builder in &builders {
        let stats = builder.stats();
        tracing::info!(
            "Index {}: {}, {} records indexed in {} ranges, limit {} after {} reductions",
            builder.index().name(),
            builder.state(),
            stats.records_indexed,
            stats.ranges_built,
            builder.limit(),
            stats.limit_reductions,
        );
    }
    let mut store = RecordStore::begin(db.as_ref(), config.clone()).await?;
    let count_index = metadata
        .index("item_count")
        .ok_or_else(|| anyhow::anyhow!("item_count missing from metadata"))?;
    let count = store.index_count(count_index).await?;
    anyhow::ensure!(
        count == args.records + written,
        "item_count is {count}, expected {}",
        args.records + written
    );
    println!("item_count = {count}");
    Ok(())
}

/// Insert new records at random keys past the preloaded ones. Returns how
/// many commits succeeded.
async fn write_concurrently(
    rt: &ProdRuntime,
    db: &dyn KeyValueStore,
    config: &RecordStoreConfig,
    first_id: i64,
    writes: i64,
) -> anyhow::Result<i64> {
    let mut written = 0;
    for i in 0..writes {
        let id = first_id + i;
        let mut store = RecordStore::begin(db, config.clone()).await?;
        store
            .save_record(ITEM, tuple!(id), json!({ "total": id % 97 }))
            .await?;
        match store.commit().await {
            Ok(()) => written += 1,
            Err(e) => tracing::debug!("Dropped write of {id}: {e:#}"),
        }
        let pause = rt.with_rng(|rng| rng.random_range(0..5));
        rt.wait(Duration::from_millis(pause)).await;
    }
    Ok(written)
}
