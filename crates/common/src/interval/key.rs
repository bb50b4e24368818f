use std::{
    borrow::Borrow,
    fmt,
    ops::Deref,
};

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct BinaryKey {
    key: Vec<u8>,
}

impl From<Vec<u8>> for BinaryKey {
    fn from(key: Vec<u8>) -> Self {
        Self { key }
    }
}

impl From<&[u8]> for BinaryKey {
    fn from(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }
}

impl From<BinaryKey> for Vec<u8> {
    fn from(b: BinaryKey) -> Self {
        b.key
    }
}

impl Deref for BinaryKey {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.key[..]
    }
}

impl Borrow<[u8]> for BinaryKey {
    fn borrow(&self) -> &[u8] {
        &self.key[..]
    }
}

impl AsRef<[u8]> for BinaryKey {
    fn as_ref(&self) -> &[u8] {
        &self.key[..]
    }
}

impl fmt::Debug for BinaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinaryKey(")?;
        for b in &self.key {
            if b.is_ascii_graphic() && *b != b'\\' {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        write!(f, ")")
    }
}

impl BinaryKey {
    pub const fn min() -> Self {
        Self { key: Vec::new() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key[..]
    }

    /// For any key `k`, `increment(k)` is the minimum key such that for
    /// all keys `s` where `k.is_prefix(s)`, we have `s < increment(k)`.
    pub fn increment(&self) -> Option<Self> {
        let mut incremented = self.clone();
        while let Some(byte) = incremented.key.last_mut() {
            if *byte < 255 {
                *byte += 1;
                return Some(incremented);
            }
            incremented.key.pop();
        }
        None
    }

    /// The smallest key strictly greater than `self`.
    pub fn successor(&self) -> Self {
        let mut key = self.key.clone();
        key.push(0);
        Self { key }
    }
}

#[cfg(test)]
mod tests {
    use cmd_util::env::env_config;
    use proptest::prelude::*;

    use super::BinaryKey;

    proptest! {
        #![proptest_config(
            ProptestConfig { cases: 256 * env_config("PROPTEST_MULTIPLIER", 1), failure_persistence: None, ..ProptestConfig::default() }
        )]

        #[test]
        fn test_increment(
            key in any::<BinaryKey>(),
            mut suffix in prop::collection::vec(any::<u8>(), 0..=2),
        ) {
            if let Some(incr) = key.increment() {
                let mut bytes_with_suffix = key.key;
                bytes_with_suffix.append(&mut suffix);
                let with_suffix = BinaryKey { key: bytes_with_suffix };
                assert!(incr > with_suffix);
            } else {
                assert!(key.iter().all(|b| *b == 255));
            }
        }

        #[test]
        fn test_successor_is_next(
            key in prop::collection::vec(any::<u8>(), 0..=3),
            other in prop::collection::vec(any::<u8>(), 0..=3),
        ) {
            let key = BinaryKey::from(key);
            let other = BinaryKey::from(other);
            let succ = key.successor();
            assert!(key < succ);
            // Nothing fits strictly between a key and its successor.
            assert!(!(key < other && other < succ));
        }
    }

    #[test]
    fn test_increment_samples() {
        let key: BinaryKey = vec![5, 6].into();
        assert_eq!(key.increment(), Some(vec![5, 7].into()));
        let key: BinaryKey = vec![5, 255, 255].into();
        assert_eq!(key.increment(), Some(vec![6].into()));
        let key: BinaryKey = vec![255, 255, 255].into();
        assert_eq!(key.increment(), None);
        let key: BinaryKey = vec![].into();
        assert_eq!(key.increment(), None);
    }

    #[test]
    fn test_debug_escapes_binary() {
        let key: BinaryKey = b"ab\x00\xff".to_vec().into();
        assert_eq!(format!("{key:?}"), "BinaryKey(ab\\x00\\xff)");
    }
}
