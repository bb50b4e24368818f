use common::{
    interval::{
        BinaryKey,
        End,
        Interval,
    },
    tuple::{
        EndpointType,
        TupleRange,
    },
};
use record_store::{
    RecordStore,
    ScanProperties,
};

use crate::target::{
    BuildCounts,
    BuildTarget,
};

impl BuildTarget {
    /// Build everything before the first record and from the last record
    /// on, returning the interior `[first, last)` left to sweep, or `None`
    /// if nothing is left.
    ///
    /// Keys outside `records_range` cannot hold an applicable record, so
    /// they are marked built without scanning.
    pub(crate) async fn build_endpoints(
        &self,
        store: &mut RecordStore,
        limit: u32,
    ) -> anyhow::Result<(Option<TupleRange>, BuildCounts)> {
        self.validate_store(store)?;
        let mut counts = BuildCounts::default();
        if !self.records_range().is_all() {
            let records = self.records_range().to_interval();
            let before = Interval::new(BinaryKey::min(), End::Excluded(records.start.0.clone()));
            self.progress()
                .insert_range(store.transaction(), &before)
                .await?;
            if let End::Excluded(end) = records.end {
                self.progress()
                    .insert_range(store.transaction(), &Interval::new(end, End::Unbounded))
                    .await?;
            }
        }

        let first = store
            .scan_records(self.records_range(), None, ScanProperties::forward(1))
            .await?
            .records
            .into_iter()
            .next()
            .map(|r| r.primary_key);
        match &first {
            Some(first) => {
                let head = TupleRange::between(None, Some(first.clone())).to_interval();
                counts += self.build_endpoint_range(store, &head, limit).await?;
            },
            None => {
                // No records at all, so every key is vacuously built.
                self.progress()
                    .insert_range(store.transaction(), &Interval::all())
                    .await?;
            },
        }

        let last = store
            .scan_records(self.records_range(), None, ScanProperties::reverse(1))
            .await?
            .records
            .into_iter()
            .next()
            .map(|r| r.primary_key);
        if let Some(last) = &last {
            let tail = TupleRange::between(Some(last.clone()), None).to_interval();
            counts += self.build_endpoint_range(store, &tail, limit).await?;
        }

        let interior = match (first, last) {
            (Some(first), Some(last)) if first != last => Some(TupleRange::new(
                Some(first),
                Some(last),
                EndpointType::RangeInclusive,
                EndpointType::RangeExclusive,
            )),
            _ => None,
        };
        Ok((interior, counts))
    }
}
