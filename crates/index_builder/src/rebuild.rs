use common::interval::Interval;
use record_store::RecordStore;

use crate::target::{
    BuildCounts,
    BuildTarget,
};

impl BuildTarget {
    /// Drop the index's entries and progress and index every record again,
    /// all in one transaction. Only suitable when the records fit in one.
    pub(crate) async fn rebuild_index(
        &self,
        store: &mut RecordStore,
        limit: u32,
    ) -> anyhow::Result<BuildCounts> {
        self.validate_store(store)?;
        store.clear_index_data(self.index());
        self.progress().clear(store.transaction()).await?;
        self.progress()
            .insert_range(store.transaction(), &Interval::all())
            .await?;

        let mut counts = BuildCounts::default();
        let mut remaining = self.records_range().to_interval();
        loop {
            let batch = self.build_range_only(store, &remaining, limit).await?;
            counts += batch.counts;
            match batch.next_start {
                Some(next) => remaining = Interval::new(next.pack(), remaining.end.clone()),
                None => break,
            }
        }
        counts.ranges_built += 1;
        Ok(counts)
    }
}
