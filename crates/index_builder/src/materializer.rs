use common::{
    interval::Interval,
    tuple::Tuple,
};
use record_store::{
    RecordStore,
    ScanProperties,
};

use crate::target::{
    BuildCounts,
    BuildTarget,
};

/// What one scan-and-index batch did.
#[derive(Debug)]
pub(crate) struct BatchOutcome {
    /// Primary key of the first record the batch did not reach, or `None`
    /// if it exhausted its range.
    pub next_start: Option<Tuple>,
    pub counts: BuildCounts,
}

impl BuildTarget {
    /// Index up to `limit` records of `range` (packed primary keys) in
    /// ascending order. Updates are applied one record at a time since some
    /// index kinds are not commutative. Does not touch the progress set.
    pub(crate) async fn build_range_only(
        &self,
        store: &mut RecordStore,
        range: &Interval,
        limit: u32,
    ) -> anyhow::Result<BatchOutcome> {
        self.validate_store(store)?;
        let batch = store
            .scan_records_in(range, None, ScanProperties::forward(limit as usize))
            .await?;
        let mut counts = BuildCounts::default();
        for record in &batch.records {
            counts.records_scanned += 1;
            if self.is_applicable(&record.record_type) {
                store.update_index(self.index(), None, Some(record)).await?;
                counts.records_indexed += 1;
            }
        }
        let next_start = match batch.continuation {
            None => None,
            Some(continuation) => {
                // Look one record ahead so the boundary is a real key.
                let next = store
                    .scan_records_in(range, Some(&continuation), ScanProperties::forward(1))
                    .await?;
                next.records.into_iter().next().map(|r| r.primary_key)
            },
        };
        Ok(BatchOutcome { next_start, counts })
    }
}
