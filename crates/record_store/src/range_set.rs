//! Durable record of which sub-ranges of a key space are already built.
//!
//! Each maximal interval is one row: `subspace || begin -> end`. Operations
//! only read the rows around the span they are asked about, so two builders
//! working on distant ranges never conflict on the progress rows.

use async_trait::async_trait;
use common::{
    interval::{
        BinaryKey,
        End,
        Interval,
        IntervalSet,
        StartIncluded,
    },
    tuple::Subspace,
};
use kv::{
    KvTransaction,
    RangeOptions,
};

const EXCLUDED_END: u8 = 0x00;
const UNBOUNDED_END: u8 = 0xff;

/// The set of already-built intervals for one index, read and written
/// inside the caller's transaction.
#[async_trait]
pub trait IntervalProgressSet: Send + Sync {
    /// The gaps of `range` that are not yet covered, in ascending order.
    async fn missing_ranges(
        &self,
        tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<Vec<Interval>>;

    /// Mark `range` covered, merging with its neighbors. Returns false iff
    /// `range` was already fully covered.
    async fn insert_range(&self, tx: &mut dyn KvTransaction, range: &Interval)
        -> anyhow::Result<bool>;

    /// Forget all coverage.
    async fn clear(&self, tx: &mut dyn KvTransaction) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct RangeSet {
    subspace: Subspace,
}

impl RangeSet {
    pub fn new(subspace: Subspace) -> Self {
        Self { subspace }
    }

    pub fn subspace(&self) -> &Subspace {
        &self.subspace
    }

    /// Every stored interval, in order.
    pub async fn built_ranges(&self, tx: &mut dyn KvTransaction) -> anyhow::Result<Vec<Interval>> {
        let rows = tx
            .get_range(&self.subspace.range(), RangeOptions::ALL)
            .await?;
        rows.into_iter()
            .map(|(k, v)| self.decode(&k, &v))
            .collect()
    }

    /// True if the single key `key` is inside a built interval.
    pub async fn contains(
        &self,
        tx: &mut dyn KvTransaction,
        key: &BinaryKey,
    ) -> anyhow::Result<bool> {
        let point = Interval::new(key.clone(), End::Excluded(key.successor()));
        Ok(self.missing_ranges(tx, &point).await?.is_empty())
    }

    fn row_key(&self, begin: &BinaryKey) -> BinaryKey {
        self.subspace.pack_raw(begin)
    }

    fn encode_end(end: &End) -> Vec<u8> {
        match end {
            End::Excluded(k) => {
                let mut out = Vec::with_capacity(k.len() + 1);
                out.push(EXCLUDED_END);
                out.extend_from_slice(k);
                out
            },
            End::Unbounded => vec![UNBOUNDED_END],
        }
    }

    fn decode(&self, key: &[u8], value: &[u8]) -> anyhow::Result<Interval> {
        let begin = BinaryKey::from(self.subspace.strip(key)?);
        let end = match value.split_first() {
            Some((&EXCLUDED_END, rest)) => End::Excluded(rest.into()),
            Some((&UNBOUNDED_END, [])) => End::Unbounded,
            _ => anyhow::bail!("Corrupt range set entry at {:?}", BinaryKey::from(key)),
        };
        Ok(Interval {
            start: StartIncluded(begin),
            end,
        })
    }

    /// The stored intervals that intersect or touch `range`: at most one
    /// starting before it, then every one starting inside it or at its end.
    async fn read_window(
        &self,
        tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<Vec<Interval>> {
        let mut window = vec![];
        let first_row = self.row_key(&range.start.0);
        let before = Interval::new(
            self.subspace.prefix().clone(),
            End::Excluded(first_row.clone()),
        );
        if !before.is_empty() {
            if let Some((k, v)) = tx
                .get_range(&before, RangeOptions::reverse(1))
                .await?
                .into_iter()
                .next()
            {
                window.push(self.decode(&k, &v)?);
            }
        }
        let last = match &range.end {
            End::Excluded(end) => End::Excluded(self.row_key(end).successor()),
            End::Unbounded => self.subspace.range().end,
        };
        for (k, v) in tx
            .get_range(&Interval::new(first_row, last), RangeOptions::ALL)
            .await?
        {
            window.push(self.decode(&k, &v)?);
        }
        Ok(window)
    }
}

#[async_trait]
impl IntervalProgressSet for RangeSet {
    async fn missing_ranges(
        &self,
        tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<Vec<Interval>> {
        if range.is_empty() {
            return Ok(vec![]);
        }
        let built: IntervalSet = self.read_window(tx, range).await?.into_iter().collect();
        Ok(built.subtract_from_interval(range).iter().collect())
    }

    async fn insert_range(
        &self,
        tx: &mut dyn KvTransaction,
        range: &Interval,
    ) -> anyhow::Result<bool> {
        if range.is_empty() {
            return Ok(false);
        }
        let window = self.read_window(tx, range).await?;
        let mut merged: IntervalSet = window.iter().cloned().collect();
        if merged.contains_interval(range) {
            return Ok(false);
        }
        merged.add(range.clone());
        for stale in &window {
            tx.clear(&self.row_key(&stale.start.0));
        }
        for interval in merged.iter() {
            tx.set(
                self.row_key(&interval.start.0),
                Self::encode_end(&interval.end),
            );
        }
        Ok(true)
    }

    async fn clear(&self, tx: &mut dyn KvTransaction) -> anyhow::Result<()> {
        tx.clear_range(&self.subspace.range());
        Ok(())
    }
}
