use common::{
    interval::{
        End,
        Interval,
    },
    tuple::Tuple,
};
use record_store::RecordStore;

use crate::{
    failure::RangeAlreadyBuiltError,
    target::{
        BuildCounts,
        BuildTarget,
    },
};

#[derive(Debug)]
pub(crate) struct UnbuiltRange {
    /// Where the next batch should start, or `None` if the whole requested
    /// range is now built.
    pub next_start: Option<Tuple>,
    pub counts: BuildCounts,
}

impl BuildTarget {
    /// Build the start of `range`, which the caller believes nothing has
    /// built yet, and record the part covered in the progress set within the
    /// same transaction. Fails with `RangeAlreadyBuiltError` if the progress
    /// set already covered any part of it.
    pub(crate) async fn build_unbuilt_range(
        &self,
        store: &mut RecordStore,
        range: &Interval,
        limit: u32,
    ) -> anyhow::Result<UnbuiltRange> {
        let batch = self.build_range_only(store, range, limit).await?;
        let real_end = match &batch.next_start {
            Some(next) => End::Excluded(next.pack()),
            None => range.end.clone(),
        };
        let built = Interval {
            start: range.start.clone(),
            end: real_end,
        };
        let missing = self
            .progress()
            .missing_ranges(store.transaction(), &built)
            .await?;
        if missing.as_slice() != std::slice::from_ref(&built) {
            return Err(RangeAlreadyBuiltError::new(range.clone()).into_anyhow());
        }
        let inserted = self
            .progress()
            .insert_range(store.transaction(), &built)
            .await?;
        if !inserted {
            return Err(RangeAlreadyBuiltError::new(range.clone()).into_anyhow());
        }
        tracing::debug!(
            "Built {built:?} of index {}: {} records indexed",
            self.index().name(),
            batch.counts.records_indexed,
        );
        let mut counts = batch.counts;
        counts.ranges_built += 1;
        Ok(UnbuiltRange {
            next_start: batch.next_start,
            counts,
        })
    }

    /// Build whatever part of `range` is still missing, all in the current
    /// transaction. Running it again over the same range does nothing.
    pub(crate) async fn build_missing_ranges(
        &self,
        store: &mut RecordStore,
        range: &Interval,
        limit: u32,
    ) -> anyhow::Result<BuildCounts> {
        let missing = self
            .progress()
            .missing_ranges(store.transaction(), range)
            .await?;
        let mut counts = BuildCounts::default();
        for gap in missing {
            let mut remaining = gap;
            loop {
                let built = self.build_unbuilt_range(store, &remaining, limit).await?;
                counts += built.counts;
                match built.next_start {
                    Some(next) => remaining = Interval::new(next.pack(), remaining.end.clone()),
                    None => break,
                }
            }
        }
        Ok(counts)
    }

    /// Build the missing parts of one of the open-ended tails and mark each
    /// missing part built as a whole.
    ///
    /// Unlike `build_missing_ranges`, the recorded progress is not clamped
    /// to where the scan stopped: a tail holding more than `limit` records
    /// is marked built past the last record actually indexed. The tails
    /// normally hold zero and one record.
    pub(crate) async fn build_endpoint_range(
        &self,
        store: &mut RecordStore,
        range: &Interval,
        limit: u32,
    ) -> anyhow::Result<BuildCounts> {
        let missing = self
            .progress()
            .missing_ranges(store.transaction(), range)
            .await?;
        let mut counts = BuildCounts::default();
        for gap in missing {
            let batch = self.build_range_only(store, &gap, limit).await?;
            counts += batch.counts;
            self.progress()
                .insert_range(store.transaction(), &gap)
                .await?;
            counts.ranges_built += 1;
        }
        Ok(counts)
    }
}
