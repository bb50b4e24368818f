//! Records, secondary indexes and index build progress stored in a
//! transactional key-value engine.
//!
//! A store occupies one subspace: records live under `(1, primary key)`,
//! index entries under `(2, index)`, index states under `(5, index name)` and
//! build progress under `(6, index)`.

mod maintainer;
pub mod metadata;
pub mod range_set;
mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
#[cfg(test)]
mod tests;

pub use crate::{
    maintainer::IndexMaintainer,
    metadata::{
        Index,
        IndexKind,
        RecordMetadata,
        RecordMetadataBuilder,
        RecordType,
    },
    range_set::{
        IntervalProgressSet,
        RangeSet,
    },
    store::{
        IndexState,
        RecordStore,
        RecordStoreConfig,
        ScanBatch,
        ScanProperties,
        StoredRecord,
    },
};
