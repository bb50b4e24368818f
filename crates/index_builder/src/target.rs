use std::{
    ops::AddAssign,
    sync::Arc,
};

use common::tuple::{
    Tuple,
    TupleRange,
};
use errors::ErrorMetadata;
use record_store::{
    Index,
    IntervalProgressSet,
    RecordStore,
    RecordStoreConfig,
    RecordType,
};

/// Work done by one or more committed batches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BuildCounts {
    pub records_scanned: u64,
    pub records_indexed: u64,
    pub ranges_built: u64,
}

impl AddAssign for BuildCounts {
    fn add_assign(&mut self, other: Self) {
        self.records_scanned += other.records_scanned;
        self.records_indexed += other.records_indexed;
        self.ranges_built += other.ranges_built;
    }
}

/// Everything about a build that is fixed once validated: the index, the
/// record types feeding it, the primary-key range they can occupy and the
/// progress set recording what is built.
pub(crate) struct BuildTarget {
    config: RecordStoreConfig,
    index: Arc<Index>,
    record_types: Vec<Arc<RecordType>>,
    records_range: TupleRange,
    progress: Arc<dyn IntervalProgressSet>,
}

impl BuildTarget {
    pub fn new(
        config: RecordStoreConfig,
        index: Arc<Index>,
        record_types: Option<Vec<Arc<RecordType>>>,
    ) -> anyhow::Result<Self> {
        let metadata = &config.metadata;
        anyhow::ensure!(
            metadata.contains_index(&index),
            ErrorMetadata::metadata_mismatch(
                "IndexNotInMetadata",
                format!("Index {} is not contained within the store's metadata", index.name()),
            )
        );
        let record_types =
            record_types.unwrap_or_else(|| metadata.record_types_for_index(&index));
        if let Some(stale) = record_types
            .iter()
            .find(|t| !metadata.contains_record_type(t))
        {
            anyhow::bail!(ErrorMetadata::metadata_mismatch(
                "RecordTypeNotInMetadata",
                format!(
                    "Record type {} is not contained within the store's metadata",
                    stale.name()
                ),
            ));
        }
        let records_range = records_range_for(&record_types);
        let progress = Arc::new(config.index_range_set(&index));
        Ok(Self {
            config,
            index,
            record_types,
            records_range,
            progress,
        })
    }

    pub fn config(&self) -> &RecordStoreConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    pub fn records_range(&self) -> &TupleRange {
        &self.records_range
    }

    pub fn progress(&self) -> &dyn IntervalProgressSet {
        self.progress.as_ref()
    }

    #[cfg(test)]
    pub fn with_progress(mut self, progress: Arc<dyn IntervalProgressSet>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_applicable(&self, record_type: &Arc<RecordType>) -> bool {
        self.record_types.iter().any(|t| Arc::ptr_eq(t, record_type))
    }

    /// The store must be opened with the very metadata this build was
    /// validated against.
    pub fn validate_store(&self, store: &RecordStore) -> anyhow::Result<()> {
        anyhow::ensure!(
            Arc::ptr_eq(store.metadata(), &self.config.metadata),
            ErrorMetadata::metadata_mismatch(
                "StoreMetadataMismatch",
                "Store does not have the same metadata as the index build",
            )
        );
        Ok(())
    }
}

/// The primary keys that can hold a record of one of `record_types`: the
/// inclusive span of their type-key prefixes, or everything if any type
/// lacks one.
pub(crate) fn records_range_for(record_types: &[Arc<RecordType>]) -> TupleRange {
    let mut bounds: Option<(Tuple, Tuple)> = None;
    for record_type in record_types {
        let Some(type_key) = record_type.record_type_key() else {
            return TupleRange::ALL;
        };
        let prefix = Tuple(vec![type_key.clone()]);
        bounds = Some(match bounds {
            None => (prefix.clone(), prefix),
            Some((low, high)) => (low.min(prefix.clone()), high.max(prefix)),
        });
    }
    match bounds {
        Some((low, high)) => TupleRange::inclusive(low, high),
        None => TupleRange::ALL,
    }
}
