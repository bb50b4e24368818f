use std::{
    collections::BTreeMap,
    iter,
    ops::Bound,
};

use itertools::Either;

use super::{
    bounds::{
        End,
        StartIncluded,
    },
    key::BinaryKey,
    Interval,
};

/// A set of `Interval`s. Intersecting and adjacent intervals are merged.
#[derive(Clone, Debug)]
pub enum IntervalSet {
    /// Map from Interval.start to Interval.end. All intervals are
    /// non-intersecting, non-adjacent, and non-empty.
    Intervals(BTreeMap<StartIncluded, End>),
    /// In-memory optimization to avoid allocating a [`BTreeMap`] to represent
    /// `{ StartIncluded(BinaryKey::min()) => End::Unbounded }`
    All,
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for IntervalSet {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::All, Self::All) => true,
            (Self::All, Self::Intervals(intervals)) | (Self::Intervals(intervals), Self::All) => {
                intervals.len() == 1
                    && intervals.get(&StartIncluded(BinaryKey::min())) == Some(&End::Unbounded)
            },
            (Self::Intervals(x), Self::Intervals(y)) => x == y,
        }
    }
}

impl Eq for IntervalSet {}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        let mut set = IntervalSet::new();
        for interval in iter {
            set.add(interval);
        }
        set
    }
}

impl IntervalSet {
    /// Construct an empty set.
    pub fn new() -> Self {
        Self::Intervals(BTreeMap::new())
    }

    /// True if this `IntervalSet` contains no keys.
    pub fn is_empty(&self) -> bool {
        match self {
            // self.intervals only contains non-empty intervals, so this is sufficient.
            Self::Intervals(intervals) => intervals.is_empty(),
            Self::All => false,
        }
    }

    /// How many intervals are in this set?
    pub fn len(&self) -> usize {
        match self {
            Self::Intervals(intervals) => intervals.len(),
            Self::All => 1,
        }
    }

    // Return all of the intervals in `intervals` that intersect with or are
    // adjacent to `interval`. This is O(log(n) + m), with `n` intervals in this
    // IntervalSet and `m` matches.
    fn intersecting_or_adjacent(
        intervals: &BTreeMap<StartIncluded, End>,
        interval: &Interval,
    ) -> Vec<Interval> {
        let mut result = vec![];
        // We *might* intersect with the preceeding interval.
        if let Some((other_start, other_end)) = intervals
            .range::<StartIncluded, _>((Bound::Unbounded, Bound::Excluded(interval.start.clone())))
            .next_back()
        {
            let other = Interval {
                start: other_start.clone(),
                end: other_end.clone(),
            };
            if !interval.is_disjoint(&other) || interval.is_adjacent(&other) {
                result.push(other);
            }
        }

        // We definitely intersect with any interval with a `start` inside `interval`.
        for (other_start, other_end) in intervals.range::<StartIncluded, _>(&interval.start..) {
            if interval.end.is_disjoint(other_start) && !interval.end.is_adjacent(other_start) {
                break;
            }
            result.push(Interval {
                start: other_start.clone(),
                end: other_end.clone(),
            });
        }
        result
    }

    /// Add the given `Interval` to the set.
    pub fn add(&mut self, interval: Interval) {
        if interval.is_empty() {
            return;
        }
        if interval == Interval::all() {
            *self = IntervalSet::All;
        }
        match self {
            IntervalSet::All => {},
            IntervalSet::Intervals(ref mut intervals) => {
                let mut merged_start = interval.start.clone();
                let mut merged_end = interval.end.clone();
                // Find every overlapping or adjacent interval, widen the new
                // interval to cover them, then replace them all with the
                // merged one. Amortized constant time: each removal is
                // charged to the insertion that created it.
                //
                // self.intervals            --- -----    ---       -----
                // interval                           ------------------
                // merged_start                  ^
                // merged_end                                           ^
                // -> self.intervals after   --- ------------------------
                //
                // self.intervals            ---          ---   ----   --
                // interval                           ---------------
                // merged start                       ^
                // merged_end                                       ^
                // -> self.intervals after   ---      ---------------  --
                for other_interval in Self::intersecting_or_adjacent(intervals, &interval) {
                    if other_interval.start < merged_start {
                        merged_start = other_interval.start.clone();
                    }
                    if other_interval.end > merged_end {
                        merged_end = other_interval.end.clone();
                    }
                    intervals.remove(&other_interval.start);
                }
                if merged_start == StartIncluded(BinaryKey::min()) && merged_end == End::Unbounded
                {
                    *self = IntervalSet::All;
                } else {
                    intervals.insert(merged_start, merged_end);
                }
            },
        };
    }

    fn interval_preceding(&self, k: &[u8]) -> Option<Interval> {
        match self {
            Self::All => Some(Interval::all()),
            Self::Intervals(intervals) => {
                let (start, end) = intervals
                    .range::<StartIncluded, _>((
                        Bound::Unbounded,
                        Bound::Included(StartIncluded(k.to_vec().into())),
                    ))
                    .next_back()?;
                Some(Interval {
                    start: start.clone(),
                    end: end.clone(),
                })
            },
        }
    }

    /// True if any of the intervals in the `IntervalSet` contain `k`.
    pub fn contains(&self, k: &[u8]) -> bool {
        // Since self.intervals are non-overlapping, the only interval that can contain
        // k is the first preceding k.
        let Some(interval) = self.interval_preceding(k) else {
            return false;
        };
        interval.contains(k)
    }

    pub fn contains_interval(&self, target: &Interval) -> bool {
        self.split_interval_components(target)
            .into_iter()
            .all(|(in_set, _)| in_set)
    }

    /// True if some interval in the set shares a key with `target`.
    pub fn intersects(&self, target: &Interval) -> bool {
        self.split_interval_components(target)
            .into_iter()
            .any(|(in_set, _)| in_set)
    }

    /// Return an iterator over all the intervals within the set.
    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        match self {
            Self::All => Either::Left(iter::once(Interval::all())),
            Self::Intervals(intervals) => Either::Right(intervals.iter().map(|(a, b)| Interval {
                start: a.clone(),
                end: b.clone(),
            })),
        }
    }

    /// Computes the set-difference target - self.
    pub fn subtract_from_interval(&self, target: &Interval) -> Self {
        let mut difference = BTreeMap::new();
        for (in_set, interval) in self.split_interval_components(target) {
            // split_interval_components alternate between `in_set` and `!in_set`, and
            // returns intervals that are adjacent and nonempty. Therefore the intervals
            // with !in_set are not intersecting or adjacent.
            if !in_set {
                difference.insert(interval.start, interval.end);
            }
        }
        Self::Intervals(difference)
    }

    /// Splits a target interval into components by whether they are in self.
    /// Returns (in_set, interval) where in_set indicates whether interval is in
    /// self, and the union of intervals is target.
    pub fn split_interval_components(&self, target: &Interval) -> Vec<(bool, Interval)> {
        let intervals = match self {
            Self::All => return vec![(true, target.clone())],
            Self::Intervals(intervals) => intervals,
        };
        let mut components = vec![];
        if target.is_empty() {
            return components;
        }
        let StartIncluded(target_start) = target.start.clone();
        let mut component_start = match self.interval_preceding(&target_start) {
            None => target_start,
            Some(interval_before) => {
                if target.end <= interval_before.end {
                    components.push((true, target.clone()));
                    return components;
                }
                // `target.end > interval_before.end`, so the preceding
                // interval is bounded.
                let Some(interval_before_end) = interval_before.end.as_key().cloned() else {
                    return components;
                };
                if interval_before_end > target_start {
                    components.push((
                        true,
                        Interval {
                            start: target.start.clone(),
                            end: interval_before.end,
                        },
                    ));
                    interval_before_end
                } else {
                    target_start
                }
            },
        };
        // Every interval starting strictly inside the rest of `target`.
        let intersecting = intervals.range::<StartIncluded, _>((
            Bound::Excluded(StartIncluded(component_start.clone())),
            match &target.end {
                End::Excluded(target_end) => Bound::Excluded(StartIncluded(target_end.clone())),
                End::Unbounded => Bound::Unbounded,
            },
        ));
        for (interval_start, interval_end) in intersecting {
            let StartIncluded(interval_start_bytes) = interval_start;
            components.push((
                false,
                Interval {
                    start: StartIncluded(component_start),
                    end: End::Excluded(interval_start_bytes.clone()),
                },
            ));
            if &target.end <= interval_end {
                components.push((
                    true,
                    Interval {
                        start: interval_start.clone(),
                        end: target.end.clone(),
                    },
                ));
                return components;
            }
            components.push((
                true,
                Interval {
                    start: interval_start.clone(),
                    end: interval_end.clone(),
                },
            ));
            // `target.end > interval_end`, so this interval is bounded.
            let Some(interval_end) = interval_end.as_key() else {
                return components;
            };
            component_start = interval_end.clone();
        }
        components.push((
            false,
            Interval {
                start: StartIncluded(component_start),
                end: target.end.clone(),
            },
        ));
        components
    }
}

#[cfg(any(test, feature = "testing"))]
mod proptest {
    use proptest::prelude::*;

    use super::IntervalSet;
    use crate::interval::Interval;

    impl Arbitrary for IntervalSet {
        type Parameters = ();

        type Strategy = BoxedStrategy<IntervalSet>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            prop::collection::vec(any::<Interval>(), 0..4)
                .prop_map(|intervals| intervals.into_iter().collect())
                .boxed()
        }
    }
}
