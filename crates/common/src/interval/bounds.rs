//! Subset of `std::ops::Bound` specialized for our restricted forms of
//! intervals.
use std::borrow::Borrow;

use super::key::BinaryKey;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct StartIncluded(pub BinaryKey);

impl Borrow<[u8]> for StartIncluded {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for StartIncluded {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<BinaryKey> for StartIncluded {
    fn from(key: BinaryKey) -> Self {
        Self(key)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum End {
    Excluded(BinaryKey),
    Unbounded,
}

impl End {
    pub fn after_prefix(key: &BinaryKey) -> Self {
        match key.increment() {
            None => Self::Unbounded,
            Some(key) => Self::Excluded(key),
        }
    }

    /// Is the interval `(-inf, end)` disjoint with `[start, +inf)`?
    pub fn is_disjoint(&self, start: &StartIncluded) -> bool {
        match (self, start) {
            (End::Unbounded, _) => false,
            (End::Excluded(s), StartIncluded(t)) => s <= t,
        }
    }

    pub fn is_adjacent(&self, start: &StartIncluded) -> bool {
        match (self, start) {
            (End::Unbounded, _) => false,
            (End::Excluded(s), StartIncluded(t)) => s[..].eq(&t[..]),
        }
    }

    #[inline]
    pub fn greater_than(&self, key: &[u8]) -> bool {
        match self {
            End::Excluded(end) => key < &end[..],
            End::Unbounded => true,
        }
    }

    pub fn as_key(&self) -> Option<&BinaryKey> {
        match self {
            End::Excluded(key) => Some(key),
            End::Unbounded => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use cmd_util::env::env_config;
    use proptest::prelude::*;

    use super::{
        super::key::BinaryKey,
        End,
        StartIncluded,
    };

    proptest! {
        #![proptest_config(
            ProptestConfig { cases: 256 * env_config("PROPTEST_MULTIPLIER", 1), failure_persistence: None, ..ProptestConfig::default() }
        )]

        #[test]
        fn test_end_ordering(key in any::<BinaryKey>()) {
            assert!(End::Excluded(key) < End::Unbounded);
        }

        #[test]
        fn test_greater_than_matches_disjoint(end in any::<End>(), key in any::<BinaryKey>()) {
            assert_eq!(end.greater_than(&key), !end.is_disjoint(&StartIncluded(key)));
        }
    }
}
