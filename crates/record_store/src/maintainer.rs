use async_trait::async_trait;
use common::tuple::{
    Subspace,
    Tuple,
    TupleElement,
};
use errors::ErrorMetadata;
use kv::KvTransaction;
use serde_json::Value as JsonValue;

use crate::{
    metadata::{
        Index,
        IndexKind,
    },
    store::StoredRecord,
};

/// Turns a record change into index mutations.
///
/// `old` is the record previously stored under the primary key (if any) and
/// `new` the one replacing it (if any). Callers must apply updates to one
/// index one at a time: maintainers may read-modify-write shared rows.
#[async_trait]
pub trait IndexMaintainer: Send + Sync {
    async fn update(
        &self,
        tx: &mut dyn KvTransaction,
        old: Option<&StoredRecord>,
        new: Option<&StoredRecord>,
    ) -> anyhow::Result<()>;
}

pub fn maintainer_for(index: &Index, subspace: Subspace) -> Box<dyn IndexMaintainer> {
    match index.kind() {
        IndexKind::Value { field } => Box::new(ValueIndexMaintainer {
            field: field.clone(),
            subspace,
        }),
        IndexKind::Count => Box::new(CountIndexMaintainer { subspace }),
    }
}

struct ValueIndexMaintainer {
    field: String,
    subspace: Subspace,
}

impl ValueIndexMaintainer {
    fn entry_key(&self, record: &StoredRecord) -> anyhow::Result<Tuple> {
        let value = field_element(&record.value, &self.field)?;
        let mut elements = Vec::with_capacity(record.primary_key.len() + 1);
        elements.push(value);
        elements.extend(record.primary_key.elements().iter().cloned());
        Ok(Tuple(elements))
    }
}

#[async_trait]
impl IndexMaintainer for ValueIndexMaintainer {
    async fn update(
        &self,
        tx: &mut dyn KvTransaction,
        old: Option<&StoredRecord>,
        new: Option<&StoredRecord>,
    ) -> anyhow::Result<()> {
        let old_key = old.map(|r| self.entry_key(r)).transpose()?;
        let new_key = new.map(|r| self.entry_key(r)).transpose()?;
        if old_key == new_key {
            // Still write the entry: rebuilding over an existing entry must
            // leave it in place.
            if let Some(key) = new_key {
                tx.set(self.subspace.pack(&key), vec![]);
            }
            return Ok(());
        }
        if let Some(key) = old_key {
            tx.clear(&self.subspace.pack(&key));
        }
        if let Some(key) = new_key {
            tx.set(self.subspace.pack(&key), vec![]);
        }
        Ok(())
    }
}

struct CountIndexMaintainer {
    subspace: Subspace,
}

#[async_trait]
impl IndexMaintainer for CountIndexMaintainer {
    async fn update(
        &self,
        tx: &mut dyn KvTransaction,
        old: Option<&StoredRecord>,
        new: Option<&StoredRecord>,
    ) -> anyhow::Result<()> {
        let delta = i64::from(new.is_some()) - i64::from(old.is_some());
        if delta == 0 {
            return Ok(());
        }
        let key = self.subspace.prefix();
        let current = match tx.get(key).await? {
            Some(bytes) => decode_count(&bytes)?,
            None => 0,
        };
        tx.set(key.clone(), (current + delta).to_le_bytes().to_vec());
        Ok(())
    }
}

pub fn decode_count(bytes: &[u8]) -> anyhow::Result<i64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Count index value has {} bytes", bytes.len()))?;
    Ok(i64::from_le_bytes(bytes))
}

fn field_element(value: &JsonValue, field: &str) -> anyhow::Result<TupleElement> {
    let element = match value.get(field) {
        None | Some(JsonValue::Null) => TupleElement::Null,
        Some(JsonValue::String(s)) => TupleElement::String(s.clone()),
        Some(JsonValue::Bool(b)) => TupleElement::Int(i64::from(*b)),
        Some(JsonValue::Number(n)) => match n.as_i64() {
            Some(i) => TupleElement::Int(i),
            None => anyhow::bail!(ErrorMetadata::bad_request(
                "UnindexableValue",
                format!("Field {field} holds {n}, which is not an integer"),
            )),
        },
        Some(other) => anyhow::bail!(ErrorMetadata::bad_request(
            "UnindexableValue",
            format!("Field {field} holds {other}, which cannot be indexed"),
        )),
    };
    Ok(element)
}

#[cfg(test)]
mod tests {
    use common::tuple::TupleElement;
    use errors::ErrorMetadataAnyhowExt;
    use serde_json::json;

    use super::field_element;

    #[test]
    fn test_field_element() -> anyhow::Result<()> {
        let value = json!({"total": 7, "name": "ada", "paid": true, "ratio": 0.5, "tags": []});
        assert_eq!(field_element(&value, "total")?, TupleElement::Int(7));
        assert_eq!(field_element(&value, "name")?, TupleElement::from("ada"));
        assert_eq!(field_element(&value, "paid")?, TupleElement::Int(1));
        assert_eq!(field_element(&value, "missing")?, TupleElement::Null);
        assert_eq!(field_element(&value, "ratio").unwrap_err().short_msg(), "UnindexableValue");
        assert_eq!(field_element(&value, "tags").unwrap_err().short_msg(), "UnindexableValue");
        Ok(())
    }
}
