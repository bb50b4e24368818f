//! Order-preserving tuple encoding for primary keys and key prefixes.
//!
//! A packed tuple is the concatenation of its packed elements, so packing a
//! prefix of a tuple yields a byte prefix of the packed tuple, and byte order
//! agrees with element-wise tuple order.

use std::{
    cmp::Ordering,
    fmt,
};

use anyhow::Context;
use errors::ErrorMetadata;

use crate::interval::{
    BinaryKey,
    End,
    Interval,
    StartIncluded,
};

const NULL_CODE: u8 = 0x00;
const BYTES_CODE: u8 = 0x01;
const STRING_CODE: u8 = 0x02;
const INT_CODE: u8 = 0x15;
const ESCAPE: u8 = 0xff;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum TupleElement {
    Null,
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
}

impl TupleElement {
    fn pack_into(&self, out: &mut Vec<u8>) {
        match self {
            TupleElement::Null => out.push(NULL_CODE),
            TupleElement::Bytes(b) => {
                out.push(BYTES_CODE);
                pack_escaped(b, out);
            },
            TupleElement::String(s) => {
                out.push(STRING_CODE);
                pack_escaped(s.as_bytes(), out);
            },
            TupleElement::Int(i) => {
                out.push(INT_CODE);
                out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
            },
        }
    }
}

impl From<i64> for TupleElement {
    fn from(i: i64) -> Self {
        TupleElement::Int(i)
    }
}

impl From<&str> for TupleElement {
    fn from(s: &str) -> Self {
        TupleElement::String(s.to_owned())
    }
}

impl From<String> for TupleElement {
    fn from(s: String) -> Self {
        TupleElement::String(s)
    }
}

impl From<Vec<u8>> for TupleElement {
    fn from(b: Vec<u8>) -> Self {
        TupleElement::Bytes(b)
    }
}

impl fmt::Display for TupleElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleElement::Null => write!(f, "null"),
            TupleElement::Bytes(b) => write!(f, "b{:?}", BinaryKey::from(b.clone())),
            TupleElement::String(s) => write!(f, "{s:?}"),
            TupleElement::Int(i) => write!(f, "{i}"),
        }
    }
}

fn pack_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for b in bytes {
        out.push(*b);
        if *b == 0 {
            out.push(ESCAPE);
        }
    }
    out.push(0);
}

/// Reads an escaped, zero-terminated byte string, returning it and the rest
/// of the input.
fn unpack_escaped(mut bytes: &[u8]) -> anyhow::Result<(Vec<u8>, &[u8])> {
    let mut out = vec![];
    loop {
        match bytes {
            [0, ESCAPE, rest @ ..] => {
                out.push(0);
                bytes = rest;
            },
            [0, rest @ ..] => return Ok((out, rest)),
            [b, rest @ ..] => {
                out.push(*b);
                bytes = rest;
            },
            [] => anyhow::bail!(malformed_tuple("unterminated byte string")),
        }
    }
}

fn malformed_tuple(detail: &str) -> ErrorMetadata {
    ErrorMetadata::bad_request("MalformedTuple", format!("Malformed packed tuple: {detail}"))
}

/// An ordered sequence of elements. Ordering is element-wise, with a proper
/// prefix sorting before any of its extensions, which is exactly the byte
/// order of the packed form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct Tuple(pub Vec<TupleElement>);

impl Tuple {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn from_elements(elements: impl IntoIterator<Item = impl Into<TupleElement>>) -> Self {
        Self(elements.into_iter().map(Into::into).collect())
    }

    pub fn push(mut self, element: impl Into<TupleElement>) -> Self {
        self.0.push(element.into());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn elements(&self) -> &[TupleElement] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Tuple) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn pack(&self) -> BinaryKey {
        let mut out = vec![];
        self.pack_into(&mut out);
        out.into()
    }

    fn pack_into(&self, out: &mut Vec<u8>) {
        for element in &self.0 {
            element.pack_into(out);
        }
    }

    pub fn unpack(mut bytes: &[u8]) -> anyhow::Result<Self> {
        let mut elements = vec![];
        while let [code, rest @ ..] = bytes {
            let (element, rest) = match *code {
                NULL_CODE => (TupleElement::Null, rest),
                BYTES_CODE => {
                    let (b, rest) = unpack_escaped(rest)?;
                    (TupleElement::Bytes(b), rest)
                },
                STRING_CODE => {
                    let (b, rest) = unpack_escaped(rest)?;
                    let s = String::from_utf8(b)
                        .map_err(|_| malformed_tuple("string element is not utf8"))?;
                    (TupleElement::String(s), rest)
                },
                INT_CODE => {
                    anyhow::ensure!(rest.len() >= 8, malformed_tuple("truncated integer"));
                    let (int_bytes, rest) = rest.split_at(8);
                    let raw = u64::from_be_bytes(
                        int_bytes
                            .try_into()
                            .context("integer element is 8 bytes")?,
                    );
                    (TupleElement::Int((raw ^ (1 << 63)) as i64), rest)
                },
                other => anyhow::bail!(malformed_tuple(&format!("unknown type code {other:#04x}"))),
            };
            elements.push(element);
            bytes = rest;
        }
        Ok(Self(elements))
    }
}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pack().cmp(&other.pack())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{element}")?;
        }
        write!(f, ")")
    }
}

#[macro_export]
macro_rules! tuple {
    ($($e:expr),* $(,)?) => {
        $crate::tuple::Tuple(vec![$($crate::tuple::TupleElement::from($e)),*])
    };
}

/// How one side of a `TupleRange` treats its tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointType {
    /// No lower bound.
    TreeStart,
    /// No upper bound.
    TreeEnd,
    /// Includes the tuple and every tuple it prefixes.
    RangeInclusive,
    /// Excludes the tuple and every tuple it prefixes.
    RangeExclusive,
}

/// A range over tuples, in the style of a scan bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleRange {
    low: Option<Tuple>,
    high: Option<Tuple>,
    low_endpoint: EndpointType,
    high_endpoint: EndpointType,
}

impl TupleRange {
    pub const ALL: TupleRange = TupleRange {
        low: None,
        high: None,
        low_endpoint: EndpointType::TreeStart,
        high_endpoint: EndpointType::TreeEnd,
    };

    pub fn new(
        low: Option<Tuple>,
        high: Option<Tuple>,
        low_endpoint: EndpointType,
        high_endpoint: EndpointType,
    ) -> Self {
        Self {
            low,
            high,
            low_endpoint,
            high_endpoint,
        }
    }

    /// `[low, high)`, where a missing bound is open.
    pub fn between(low: Option<Tuple>, high: Option<Tuple>) -> Self {
        let low_endpoint = if low.is_some() {
            EndpointType::RangeInclusive
        } else {
            EndpointType::TreeStart
        };
        let high_endpoint = if high.is_some() {
            EndpointType::RangeExclusive
        } else {
            EndpointType::TreeEnd
        };
        Self::new(low, high, low_endpoint, high_endpoint)
    }

    /// Both ends inclusive, so every tuple prefixed by `high` is covered.
    pub fn inclusive(low: Tuple, high: Tuple) -> Self {
        Self::new(
            Some(low),
            Some(high),
            EndpointType::RangeInclusive,
            EndpointType::RangeInclusive,
        )
    }

    pub fn is_all(&self) -> bool {
        self.to_interval() == Interval::all()
    }

    pub fn low(&self) -> Option<&Tuple> {
        self.low.as_ref()
    }

    pub fn high(&self) -> Option<&Tuple> {
        self.high.as_ref()
    }

    pub fn low_endpoint(&self) -> EndpointType {
        self.low_endpoint
    }

    pub fn high_endpoint(&self) -> EndpointType {
        self.high_endpoint
    }

    /// The packed-key interval this range covers.
    pub fn to_interval(&self) -> Interval {
        let start = match (&self.low, self.low_endpoint) {
            (Some(low), EndpointType::RangeInclusive) => low.pack(),
            (Some(low), EndpointType::RangeExclusive) => match low.pack().increment() {
                Some(key) => key,
                None => return Interval::empty(),
            },
            _ => BinaryKey::min(),
        };
        let end = match (&self.high, self.high_endpoint) {
            (Some(high), EndpointType::RangeInclusive) => End::after_prefix(&high.pack()),
            (Some(high), EndpointType::RangeExclusive) => End::Excluded(high.pack()),
            _ => End::Unbounded,
        };
        Interval {
            start: StartIncluded(start),
            end,
        }
    }
}

impl fmt::Display for TupleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.low, self.low_endpoint) {
            (Some(low), EndpointType::RangeInclusive) => write!(f, "[{low}")?,
            (Some(low), EndpointType::RangeExclusive) => write!(f, "({low}")?,
            _ => write!(f, "[-inf")?,
        }
        match (&self.high, self.high_endpoint) {
            (Some(high), EndpointType::RangeInclusive) => write!(f, ", {high}]"),
            (Some(high), EndpointType::RangeExclusive) => write!(f, ", {high})"),
            _ => write!(f, ", +inf)"),
        }
    }
}

/// A key prefix that namespaces a region of the key space.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subspace {
    prefix: BinaryKey,
}

impl Subspace {
    pub fn new(prefix: &Tuple) -> Self {
        Self {
            prefix: prefix.pack(),
        }
    }

    pub fn from_bytes(prefix: impl Into<BinaryKey>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &BinaryKey {
        &self.prefix
    }

    pub fn subspace(&self, suffix: &Tuple) -> Self {
        Self {
            prefix: self.pack(suffix),
        }
    }

    pub fn pack(&self, tuple: &Tuple) -> BinaryKey {
        let mut out = Vec::from(self.prefix.clone());
        tuple.pack_into(&mut out);
        out.into()
    }

    /// Prepend the prefix to already-packed bytes.
    pub fn pack_raw(&self, suffix: &[u8]) -> BinaryKey {
        let mut out = Vec::from(self.prefix.clone());
        out.extend_from_slice(suffix);
        out.into()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Strip the prefix from a key inside this subspace.
    pub fn strip<'k>(&self, key: &'k [u8]) -> anyhow::Result<&'k [u8]> {
        key.strip_prefix(&self.prefix[..]).with_context(|| {
            format!("{:?} is outside subspace {:?}", BinaryKey::from(key), self.prefix)
        })
    }

    pub fn unpack(&self, key: &[u8]) -> anyhow::Result<Tuple> {
        Tuple::unpack(self.strip(key)?)
    }

    /// Every key in this subspace, including the bare prefix.
    pub fn range(&self) -> Interval {
        Interval::prefix(self.prefix.clone())
    }

    /// Map an interval of suffixes to the absolute interval inside this
    /// subspace.
    pub fn nest(&self, interval: &Interval) -> Interval {
        let end = match &interval.end {
            End::Excluded(end) => End::Excluded(self.pack_raw(end)),
            End::Unbounded => End::after_prefix(&self.prefix),
        };
        Interval {
            start: StartIncluded(self.pack_raw(&interval.start.0)),
            end,
        }
    }
}
