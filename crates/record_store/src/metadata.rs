use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::Arc,
};

use common::tuple::TupleElement;
use errors::ErrorMetadata;

/// A kind of record stored in the store.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordType {
    name: String,
    record_type_key: Option<TupleElement>,
}

impl RecordType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When present, every primary key of this type starts with this element.
    pub fn record_type_key(&self) -> Option<&TupleElement> {
        self.record_type_key.as_ref()
    }

    pub fn primary_key_has_record_type_prefix(&self) -> bool {
        self.record_type_key.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// One entry per record, keyed by the value of `field` and then the
    /// primary key. Reapplying a record is harmless.
    Value { field: String },
    /// A single running count of the records the index covers. Reapplying a
    /// record counts it twice.
    Count,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    name: String,
    version: u32,
    subspace_key: TupleElement,
    kind: IndexKind,
    /// `None` covers every record type.
    record_types: Option<BTreeSet<String>>,
}

impl Index {
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        let name = name.into();
        Self {
            subspace_key: TupleElement::String(name.clone()),
            name,
            version: 1,
            kind,
            record_types: None,
        }
    }

    pub fn value(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(
            name,
            IndexKind::Value {
                field: field.into(),
            },
        )
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, IndexKind::Count)
    }

    pub fn on_record_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.record_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_subspace_key(mut self, key: impl Into<TupleElement>) -> Self {
        self.subspace_key = key.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn subspace_key(&self) -> &TupleElement {
        &self.subspace_key
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn applies_to(&self, record_type: &str) -> bool {
        match &self.record_types {
            None => true,
            Some(types) => types.contains(record_type),
        }
    }
}

/// An immutable snapshot of the store's schema. Record types and indexes are
/// shared by `Arc`, so whether two handles came from the same snapshot is a
/// pointer comparison.
#[derive(Debug)]
pub struct RecordMetadata {
    record_types: BTreeMap<String, Arc<RecordType>>,
    indexes: BTreeMap<String, Arc<Index>>,
}

impl RecordMetadata {
    pub fn builder() -> RecordMetadataBuilder {
        RecordMetadataBuilder::default()
    }

    pub fn record_type(&self, name: &str) -> Option<&Arc<RecordType>> {
        self.record_types.get(name)
    }

    pub fn record_types(&self) -> impl Iterator<Item = &Arc<RecordType>> {
        self.record_types.values()
    }

    pub fn index(&self, name: &str) -> Option<&Arc<Index>> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Arc<Index>> {
        self.indexes.values()
    }

    /// True if `index` is this snapshot's own index object, not merely one
    /// with the same name.
    pub fn contains_index(&self, index: &Arc<Index>) -> bool {
        self.indexes
            .get(index.name())
            .is_some_and(|ours| Arc::ptr_eq(ours, index))
    }

    pub fn contains_record_type(&self, record_type: &Arc<RecordType>) -> bool {
        self.record_types
            .get(record_type.name())
            .is_some_and(|ours| Arc::ptr_eq(ours, record_type))
    }

    pub fn record_types_for_index(&self, index: &Index) -> Vec<Arc<RecordType>> {
        self.record_types
            .values()
            .filter(|t| index.applies_to(t.name()))
            .cloned()
            .collect()
    }

    pub fn indexes_for_record_type(&self, record_type: &str) -> Vec<Arc<Index>> {
        self.indexes
            .values()
            .filter(|i| i.applies_to(record_type))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct RecordMetadataBuilder {
    record_types: Vec<RecordType>,
    indexes: Vec<Index>,
}

impl RecordMetadataBuilder {
    pub fn add_record_type(
        mut self,
        name: impl Into<String>,
        record_type_key: Option<TupleElement>,
    ) -> Self {
        self.record_types.push(RecordType {
            name: name.into(),
            record_type_key,
        });
        self
    }

    pub fn add_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<RecordMetadata>> {
        let mut record_types = BTreeMap::new();
        for record_type in self.record_types {
            let name = record_type.name.clone();
            if record_types.insert(name.clone(), Arc::new(record_type)).is_some() {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "DuplicateRecordType",
                    format!("Record type {name} is defined twice"),
                ));
            }
        }
        let mut indexes = BTreeMap::new();
        let mut subspace_keys = BTreeSet::new();
        for index in self.indexes {
            if let Some(types) = &index.record_types {
                if let Some(missing) = types.iter().find(|t| !record_types.contains_key(*t)) {
                    anyhow::bail!(ErrorMetadata::bad_request(
                        "UnknownRecordType",
                        format!("Index {} refers to unknown record type {missing}", index.name),
                    ));
                }
            }
            if !subspace_keys.insert(format!("{:?}", index.subspace_key)) {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "DuplicateIndexSubspace",
                    format!("Index {} reuses subspace key {}", index.name, index.subspace_key),
                ));
            }
            let name = index.name.clone();
            if indexes.insert(name.clone(), Arc::new(index)).is_some() {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "DuplicateIndex",
                    format!("Index {name} is defined twice"),
                ));
            }
        }
        Ok(Arc::new(RecordMetadata {
            record_types,
            indexes,
        }))
    }
}
