/// This module provides functionality for representing sets of intervals on
/// strings of bytes.
///
/// The set of byte strings has a few useful properties:
/// 1. There is a minimum (the empty string)
/// 2. Every string `s` has a smallest string `t` such that `s < t`, its
///    successor. Note that since we don't put a bound on the length of these
///    strings, strings have successors but not predecessors.
///
/// With these properties, we can simplify our intervals greatly:
/// 1. Every interval can be formed as an inclusive lower bound and exclusive
///    upper bound.
/// 2. We don't need to represent -inf in our system, just +inf.
mod bounds;
mod interval_set;
mod key;

#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;

use std::{
    fmt,
    ops::{
        Bound,
        RangeBounds,
    },
};

pub use self::{
    bounds::{
        End,
        StartIncluded,
    },
    interval_set::IntervalSet,
    key::BinaryKey,
};

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct Interval {
    pub start: StartIncluded,
    pub end: End,
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, ", self.start.0)?;
        match &self.end {
            End::Excluded(key) => write!(f, "{key:?})"),
            End::Unbounded => write!(f, "+inf)"),
        }
    }
}

impl Interval {
    pub fn new(start: BinaryKey, end: End) -> Self {
        Self {
            start: StartIncluded(start),
            end,
        }
    }

    pub fn prefix(key: BinaryKey) -> Self {
        let end = End::after_prefix(&key);
        Self {
            start: StartIncluded(key),
            end,
        }
    }

    pub const fn empty() -> Self {
        Self {
            start: StartIncluded(BinaryKey::min()),
            end: End::Excluded(BinaryKey::min()),
        }
    }

    pub const fn all() -> Self {
        Self {
            start: StartIncluded(BinaryKey::min()),
            end: End::Unbounded,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.end {
            End::Unbounded => false,
            End::Excluded(t) => self.start.0 >= *t,
        }
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_empty() || self.start <= other.start && other.end <= self.end
    }

    pub fn contains(&self, point: &[u8]) -> bool {
        &self.start.0[..] <= point && self.end.greater_than(point)
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.is_empty()
            || other.is_empty()
            || other.end.is_disjoint(&self.start)
            || self.end.is_disjoint(&other.start)
    }

    pub fn is_adjacent(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.end.is_adjacent(&other.start) || other.end.is_adjacent(&self.start)
    }

    /// The overlap of two intervals, possibly empty.
    pub fn intersect(&self, other: &Self) -> Self {
        let start = std::cmp::max(&self.start, &other.start).clone();
        let end = std::cmp::min(&self.end, &other.end).clone();
        if (Interval { start: start.clone(), end: end.clone() }).is_empty() {
            return Interval::empty();
        }
        Interval { start, end }
    }

    /// Split `self` at `key` into `[start, key)` and `[key, end)`. Either half
    /// may be empty.
    pub fn split_at(&self, key: &BinaryKey) -> (Self, Self) {
        let StartIncluded(ref start) = self.start;
        let split = if key < start {
            start.clone()
        } else if self.end.greater_than(key) {
            key.clone()
        } else {
            return (self.clone(), Interval::empty());
        };
        (
            Interval {
                start: self.start.clone(),
                end: End::Excluded(split.clone()),
            },
            Interval {
                start: StartIncluded(split),
                end: self.end.clone(),
            },
        )
    }
}

impl RangeBounds<[u8]> for &Interval {
    fn start_bound(&self) -> Bound<&[u8]> {
        let StartIncluded(ref s) = self.start;
        Bound::Included(&s[..])
    }

    fn end_bound(&self) -> Bound<&[u8]> {
        match self.end {
            End::Excluded(ref s) => Bound::Excluded(&s[..]),
            End::Unbounded => Bound::Unbounded,
        }
    }
}
