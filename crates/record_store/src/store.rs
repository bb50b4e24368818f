use std::sync::Arc;

use anyhow::Context;
use common::{
    interval::{
        BinaryKey,
        Interval,
    },
    tuple,
    tuple::{
        Subspace,
        Tuple,
        TupleRange,
    },
};
use errors::ErrorMetadata;
use kv::{
    KeyValueStore,
    KvTransaction,
    RangeOptions,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    maintainer::{
        decode_count,
        maintainer_for,
    },
    metadata::{
        Index,
        IndexKind,
        RecordMetadata,
        RecordType,
    },
    range_set::{
        IntervalProgressSet,
        RangeSet,
    },
};

const RECORD_KEY: i64 = 1;
const INDEX_KEY: i64 = 2;
const INDEX_STATE_SPACE_KEY: i64 = 5;
const INDEX_RANGE_SPACE_KEY: i64 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Maintained and safe to query. Indexes without a stored state are
    /// readable.
    Readable,
    /// Maintained for records inside its built ranges, not yet queryable.
    WriteOnly,
    /// Neither maintained nor queryable.
    Disabled,
}

/// Where a store lives and the schema it is opened with.
#[derive(Clone, Debug)]
pub struct RecordStoreConfig {
    pub subspace: Subspace,
    pub metadata: Arc<RecordMetadata>,
}

impl RecordStoreConfig {
    pub fn new(subspace: Subspace, metadata: Arc<RecordMetadata>) -> Self {
        Self { subspace, metadata }
    }

    pub fn records_subspace(&self) -> Subspace {
        self.subspace.subspace(&tuple!(RECORD_KEY))
    }

    pub fn index_subspace(&self, index: &Index) -> Subspace {
        self.subspace
            .subspace(&Tuple(vec![INDEX_KEY.into(), index.subspace_key().clone()]))
    }

    pub fn index_range_subspace(&self, index: &Index) -> Subspace {
        self.subspace.subspace(&Tuple(vec![
            INDEX_RANGE_SPACE_KEY.into(),
            index.subspace_key().clone(),
        ]))
    }

    pub fn index_range_set(&self, index: &Index) -> RangeSet {
        RangeSet::new(self.index_range_subspace(index))
    }

    fn index_state_key(&self, index: &Index) -> BinaryKey {
        self.subspace
            .pack(&tuple!(INDEX_STATE_SPACE_KEY, index.name()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub record_type: Arc<RecordType>,
    pub primary_key: Tuple,
    pub value: JsonValue,
}

#[derive(Serialize, Deserialize)]
struct SerializedRecord {
    #[serde(rename = "type")]
    record_type: String,
    value: JsonValue,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanProperties {
    /// Stop after this many records.
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl ScanProperties {
    pub const ALL: ScanProperties = ScanProperties {
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

#[derive(Debug)]
pub struct ScanBatch {
    pub records: Vec<StoredRecord>,
    /// Set when the scan stopped at its limit: the packed primary key of the
    /// last returned record. Passing it back resumes after that record.
    pub continuation: Option<Vec<u8>>,
}

/// Records and indexes of one store, seen through a single transaction.
pub struct RecordStore {
    tx: Box<dyn KvTransaction>,
    config: RecordStoreConfig,
}

impl RecordStore {
    pub fn open(tx: Box<dyn KvTransaction>, config: RecordStoreConfig) -> Self {
        Self { tx, config }
    }

    pub async fn begin(db: &dyn KeyValueStore, config: RecordStoreConfig) -> anyhow::Result<Self> {
        Ok(Self::open(db.begin().await?, config))
    }

    pub fn config(&self) -> &RecordStoreConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        &self.config.metadata
    }

    pub fn transaction(&mut self) -> &mut dyn KvTransaction {
        self.tx.as_mut()
    }

    pub async fn commit(self) -> anyhow::Result<()> {
        self.tx.commit().await
    }

    pub fn index_range_set(&self, index: &Index) -> RangeSet {
        self.config.index_range_set(index)
    }

    pub async fn scan_records(
        &mut self,
        range: &TupleRange,
        continuation: Option<&[u8]>,
        props: ScanProperties,
    ) -> anyhow::Result<ScanBatch> {
        self.scan_records_in(&range.to_interval(), continuation, props)
            .await
    }

    /// Scan the records whose packed primary keys fall in `range`.
    pub async fn scan_records_in(
        &mut self,
        range: &Interval,
        continuation: Option<&[u8]>,
        props: ScanProperties,
    ) -> anyhow::Result<ScanBatch> {
        let records_subspace = self.config.records_subspace();
        let mut interval = records_subspace.nest(range);
        if let Some(continuation) = continuation {
            let resume_from = records_subspace.pack_raw(continuation);
            interval = if props.reverse {
                interval.split_at(&resume_from).0
            } else {
                interval.split_at(&resume_from.successor()).1
            };
        }
        let options = RangeOptions {
            limit: props.limit,
            reverse: props.reverse,
        };
        let rows = self.tx.get_range(&interval, options).await?;
        let hit_limit = props.limit.is_some_and(|limit| rows.len() >= limit);
        let continuation = match rows.last() {
            Some((key, _)) if hit_limit => Some(records_subspace.strip(key)?.to_vec()),
            _ => None,
        };
        let records = rows
            .iter()
            .map(|(key, value)| self.decode_record(&records_subspace, key, value))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ScanBatch {
            records,
            continuation,
        })
    }

    pub async fn load_record(
        &mut self,
        primary_key: &Tuple,
    ) -> anyhow::Result<Option<StoredRecord>> {
        let records_subspace = self.config.records_subspace();
        let key = records_subspace.pack(primary_key);
        match self.tx.get(&key).await? {
            Some(value) => Ok(Some(self.decode_record(&records_subspace, &key, &value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the record at `primary_key`, updating every index
    /// that is currently maintained for it.
    pub async fn save_record(
        &mut self,
        record_type: &str,
        primary_key: Tuple,
        value: JsonValue,
    ) -> anyhow::Result<StoredRecord> {
        let record_type = self
            .config
            .metadata
            .record_type(record_type)
            .cloned()
            .with_context(|| {
                ErrorMetadata::not_found(
                    "UnknownRecordType",
                    format!("Record type {record_type} is not in the store's metadata"),
                )
            })?;
        if let Some(type_key) = record_type.record_type_key() {
            anyhow::ensure!(
                primary_key.elements().first() == Some(type_key),
                ErrorMetadata::bad_request(
                    "PrimaryKeyMismatch",
                    format!(
                        "Primary key {primary_key} of a {} must start with {type_key}",
                        record_type.name()
                    ),
                )
            );
        }
        let serialized = serde_json::to_vec(&SerializedRecord {
            record_type: record_type.name().to_string(),
            value: value.clone(),
        })?;
        let record = StoredRecord {
            record_type,
            primary_key,
            value,
        };
        let old = self.load_record(&record.primary_key).await?;
        self.tx
            .set(self.config.records_subspace().pack(&record.primary_key), serialized);
        self.update_secondary_indexes(old.as_ref(), Some(&record))
            .await?;
        Ok(record)
    }

    /// Returns whether a record was deleted.
    pub async fn delete_record(&mut self, primary_key: &Tuple) -> anyhow::Result<bool> {
        let Some(old) = self.load_record(primary_key).await? else {
            return Ok(false);
        };
        self.tx
            .clear(&self.config.records_subspace().pack(primary_key));
        self.update_secondary_indexes(Some(&old), None).await?;
        Ok(true)
    }

    pub async fn index_state(&mut self, index: &Index) -> anyhow::Result<IndexState> {
        match self.tx.get(&self.config.index_state_key(index)).await? {
            None => Ok(IndexState::Readable),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    pub async fn is_index_write_only(&mut self, index: &Index) -> anyhow::Result<bool> {
        Ok(self.index_state(index).await? == IndexState::WriteOnly)
    }

    /// Returns whether the state changed.
    pub async fn mark_index_write_only(&mut self, index: &Index) -> anyhow::Result<bool> {
        self.set_index_state(index, IndexState::WriteOnly).await
    }

    /// Refuses while any part of the key space is still unbuilt.
    pub async fn mark_index_readable(&mut self, index: &Index) -> anyhow::Result<bool> {
        if self.index_state(index).await? == IndexState::Readable {
            return Ok(false);
        }
        let range_set = self.index_range_set(index);
        let missing = range_set.missing_ranges(self.tx.as_mut(), &Interval::all()).await?;
        if let Some(first) = missing.first() {
            anyhow::bail!(ErrorMetadata::invalid_index_state(
                "IndexNotBuilt",
                format!(
                    "Index {} cannot be made readable: {first:?} is not built",
                    index.name()
                ),
            ));
        }
        self.set_index_state(index, IndexState::Readable).await
    }

    /// Disabling an index drops its entries and its build progress.
    pub async fn mark_index_disabled(&mut self, index: &Index) -> anyhow::Result<bool> {
        let changed = self.set_index_state(index, IndexState::Disabled).await?;
        if changed {
            self.clear_index_data(index);
            let range_set = self.index_range_set(index);
            range_set.clear(self.tx.as_mut()).await?;
        }
        Ok(changed)
    }

    async fn set_index_state(&mut self, index: &Index, state: IndexState) -> anyhow::Result<bool> {
        if self.index_state(index).await? == state {
            return Ok(false);
        }
        let key = self.config.index_state_key(index);
        match state {
            IndexState::Readable => self.tx.clear(&key),
            _ => self.tx.set(key, serde_json::to_vec(&state)?),
        }
        tracing::info!("Index {} is now {state:?}", index.name());
        Ok(true)
    }

    pub fn clear_index_data(&mut self, index: &Index) {
        self.tx
            .clear_range(&self.config.index_subspace(index).range());
    }

    /// Apply one record change to `index`, regardless of its state.
    pub async fn update_index(
        &mut self,
        index: &Index,
        old: Option<&StoredRecord>,
        new: Option<&StoredRecord>,
    ) -> anyhow::Result<()> {
        let maintainer = maintainer_for(index, self.config.index_subspace(index));
        maintainer.update(self.tx.as_mut(), old, new).await
    }

    /// Every entry of `index` as `(entry key, value)`.
    pub async fn scan_index(&mut self, index: &Index) -> anyhow::Result<Vec<(Tuple, Vec<u8>)>> {
        let subspace = self.config.index_subspace(index);
        self.tx
            .get_range(&subspace.range(), RangeOptions::ALL)
            .await?
            .into_iter()
            .map(|(key, value)| Ok::<_, anyhow::Error>((subspace.unpack(&key)?, value)))
            .collect()
    }

    /// The running total of a count index.
    pub async fn index_count(&mut self, index: &Index) -> anyhow::Result<i64> {
        anyhow::ensure!(
            *index.kind() == IndexKind::Count,
            ErrorMetadata::bad_request(
                "NotACountIndex",
                format!("Index {} does not keep a count", index.name()),
            )
        );
        let key = self.config.index_subspace(index).prefix().clone();
        match self.tx.get(&key).await? {
            Some(bytes) => decode_count(&bytes),
            None => Ok(0),
        }
    }

    async fn update_secondary_indexes(
        &mut self,
        old: Option<&StoredRecord>,
        new: Option<&StoredRecord>,
    ) -> anyhow::Result<()> {
        let Some(primary_key) = new.or(old).map(|r| r.primary_key.pack()) else {
            return Ok(());
        };
        let indexes: Vec<_> = self.config.metadata.indexes().cloned().collect();
        for index in indexes {
            let old = old.filter(|r| index.applies_to(r.record_type.name()));
            let new = new.filter(|r| index.applies_to(r.record_type.name()));
            if old.is_none() && new.is_none() {
                continue;
            }
            let maintained = match self.index_state(&index).await? {
                IndexState::Readable => true,
                IndexState::Disabled => false,
                IndexState::WriteOnly => {
                    let range_set = self.index_range_set(&index);
                    range_set.contains(self.tx.as_mut(), &primary_key).await?
                },
            };
            if maintained {
                self.update_index(&index, old, new).await?;
            }
        }
        Ok(())
    }

    fn decode_record(
        &self,
        records_subspace: &Subspace,
        key: &[u8],
        value: &[u8],
    ) -> anyhow::Result<StoredRecord> {
        let primary_key = records_subspace.unpack(key)?;
        let serialized: SerializedRecord = serde_json::from_slice(value)
            .with_context(|| format!("Corrupt record at {primary_key}"))?;
        let record_type = self
            .config
            .metadata
            .record_type(&serialized.record_type)
            .cloned()
            .with_context(|| {
                ErrorMetadata::not_found(
                    "UnknownRecordType",
                    format!(
                        "Record {primary_key} has type {}, which is not in the store's metadata",
                        serialized.record_type
                    ),
                )
            })?;
        Ok(StoredRecord {
            record_type,
            primary_key,
            value: serialized.value,
        })
    }
}

