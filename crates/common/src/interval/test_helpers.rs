use std::collections::BTreeSet;

use proptest::prelude::*;

use super::{
    bounds::{
        End,
        StartIncluded,
    },
    key::BinaryKey,
    Interval,
    IntervalSet,
};

pub fn key(s: &'static [u8]) -> BinaryKey {
    s.to_vec().into()
}

pub fn start(s: &'static [u8]) -> StartIncluded {
    StartIncluded(key(s))
}

pub fn int_start(s: u8) -> StartIncluded {
    StartIncluded(vec![s].into())
}

pub fn end(s: &'static [u8]) -> End {
    End::Excluded(key(s))
}

pub fn int_end(s: u8) -> End {
    End::Excluded(vec![s].into())
}

pub fn int_interval(s: u8, e: u8) -> Interval {
    Interval {
        start: int_start(s),
        end: int_end(e),
    }
}

pub fn int_interval_unbounded(s: u8) -> Interval {
    Interval {
        start: int_start(s),
        end: End::Unbounded,
    }
}

pub fn new_interval_set(intervals: Vec<Interval>) -> IntervalSet {
    let mut interval_set = IntervalSet::new();
    for interval in intervals {
        interval_set.add(interval);
    }
    interval_set
}

pub fn small_key() -> impl Strategy<Value = BinaryKey> {
    prop::collection::vec(any::<u8>(), 0..4).prop_map(|v| v.into())
}

pub fn u8_interval() -> impl Strategy<Value = (BTreeSet<BinaryKey>, Interval)> {
    any::<(Option<u8>, Option<u8>)>().prop_map(|(s, t)| {
        let mut reference = BTreeSet::new();
        if s.is_none() {
            reference.insert(vec![].into());
        }
        let start = s.unwrap_or(0) as usize;
        let end = t.map(|e| e as usize).unwrap_or(256);
        for i in start..end {
            reference.insert(vec![i as u8].into());
        }
        let start = StartIncluded(s.map(|s| vec![s]).unwrap_or_default().into());
        let end = t
            .map(|t| End::Excluded(vec![t].into()))
            .unwrap_or(End::Unbounded);
        (reference, Interval { start, end })
    })
}

prop_compose! {
    pub fn small_interval()(
        start in small_key(),
        end in prop::option::of(small_key()),
    ) -> Interval {
        let start = StartIncluded(start);
        let end = end.map(End::Excluded).unwrap_or(End::Unbounded);
        Interval { start, end }
    }
}
