//! Ordered binary key/value pair lists used as request and response info.
//!
//! The surrounding framework delivers request metadata as an ordered list of
//! `(key, value)` pairs interpretable as HTTP headers, and expects response
//! metadata in the same shape. Keys are lowercase ASCII.

use std::str;

/// An ordered list of binary header pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a pair, preserving insertion order.
    pub fn push(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.0.push((key.to_owned(), value.into()));
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_slice())
    }

    /// First value stored under `key`, decoded as UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| str::from_utf8(v).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend_from(&mut self, other: &Headers) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl FromIterator<(String, Vec<u8>)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One specification out of a `range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `start-end`, both inclusive. A negative start counts from EOF.
    FromTo(i64, u64),
    /// `start-` open-ended. A negative start selects a suffix of that length.
    From(i64),
}

/// Outcome of parsing a `range` header value.
#[derive(Debug, PartialEq, Eq)]
pub enum RangeHeader {
    /// Well-formed byte ranges, in header order.
    Bytes(Vec<RangeSpec>),
    /// A ranges unit other than `bytes`.
    NotBytes,
    /// Unparseable header.
    Malformed,
}

/// Parses a `range` header value such as `bytes=0-0,2-2` or `bytes=-5`.
pub fn parse_range(value: &[u8]) -> RangeHeader {
    let value = match str::from_utf8(value) {
        Ok(v) => v.trim(),
        Err(_) => return RangeHeader::Malformed,
    };
    let rest = match value.split_once('=') {
        Some((unit, rest)) if unit.trim().eq_ignore_ascii_case("bytes") => rest,
        Some(_) => return RangeHeader::NotBytes,
        None => return RangeHeader::Malformed,
    };
    let mut specs = Vec::new();
    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return RangeHeader::Malformed;
        }
        // A leading '-' is a suffix length, not a separator.
        let split = if let Some(stripped) = part.strip_prefix('-') {
            stripped.find('-').map(|i| i + 1)
        } else {
            part.find('-')
        };
        let spec = match split {
            None => match part.parse::<i64>() {
                Ok(start) => RangeSpec::From(start),
                Err(_) => return RangeHeader::Malformed,
            },
            Some(i) => {
                let (start, end) = (part[..i].trim(), part[i + 1..].trim());
                let start = match start.parse::<i64>() {
                    Ok(s) => s,
                    Err(_) => return RangeHeader::Malformed,
                };
                if end.is_empty() {
                    RangeSpec::From(start)
                } else {
                    match end.parse::<u64>() {
                        Ok(e) => RangeSpec::FromTo(start, e),
                        Err(_) => return RangeHeader::Malformed,
                    }
                }
            }
        };
        specs.push(spec);
    }
    if specs.is_empty() {
        return RangeHeader::Malformed;
    }
    RangeHeader::Bytes(specs)
}

impl RangeSpec {
    /// Resolves the spec against a body of `len` bytes into an inclusive
    /// `(start, end)` pair. Returns `None` when the resolved start would be
    /// negative.
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        match *self {
            Self::FromTo(start, end) => {
                let start = resolve_start(start, len)?;
                Some((start, end))
            }
            Self::From(start) => {
                let start = resolve_start(start, len)?;
                Some((start, len.saturating_sub(1)))
            }
        }
    }

    /// Resolves the spec for a write against a body of `len` bytes:
    /// the absolute start plus the stated end, if any. Unlike reads,
    /// writes may address positions at or past the current length.
    pub fn write_bounds(&self, len: u64) -> Option<(u64, Option<u64>)> {
        match *self {
            Self::FromTo(start, end) => Some((resolve_start(start, len)?, Some(end))),
            Self::From(start) => Some((resolve_start(start, len)?, None)),
        }
    }
}

fn resolve_start(start: i64, len: u64) -> Option<u64> {
    if start >= 0 {
        Some(start as u64)
    } else {
        let back = start.unsigned_abs();
        if back > len {
            None
        } else {
            Some(len - back)
        }
    }
}

/// Builds a multipart boundary token unique to one response.
///
/// Derived from the generation stamp and an emission counter so no
/// randomness source is needed.
pub fn multipart_boundary(stamp: u64, counter: u32) -> String {
    format!("fsorigin{:016x}{:08x}", stamp, counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.push("range", b"bytes=0-1".to_vec());
        assert_eq!(h.get("Range"), Some(&b"bytes=0-1"[..]));
        assert_eq!(h.get("etag"), None);
    }

    #[test]
    fn parses_single_range() {
        assert_eq!(
            parse_range(b"bytes=0-0"),
            RangeHeader::Bytes(vec![RangeSpec::FromTo(0, 0)])
        );
    }

    #[test]
    fn parses_multiple_ranges() {
        assert_eq!(
            parse_range(b"bytes=0-0, 2-2"),
            RangeHeader::Bytes(vec![RangeSpec::FromTo(0, 0), RangeSpec::FromTo(2, 2)])
        );
    }

    #[test]
    fn parses_open_and_suffix_ranges() {
        assert_eq!(
            parse_range(b"bytes=5-"),
            RangeHeader::Bytes(vec![RangeSpec::From(5)])
        );
        assert_eq!(
            parse_range(b"bytes=-4"),
            RangeHeader::Bytes(vec![RangeSpec::From(-4)])
        );
    }

    #[test]
    fn rejects_other_units_and_garbage() {
        assert_eq!(parse_range(b"lines=0-4"), RangeHeader::NotBytes);
        assert_eq!(parse_range(b"bytes=a-b"), RangeHeader::Malformed);
        assert_eq!(parse_range(b"0-4"), RangeHeader::Malformed);
        assert_eq!(parse_range(b"bytes="), RangeHeader::Malformed);
    }

    #[test]
    fn resolves_suffix_from_eof() {
        assert_eq!(RangeSpec::From(-2).resolve(10), Some((8, 9)));
        assert_eq!(RangeSpec::FromTo(-3, 9).resolve(10), Some((7, 9)));
        assert_eq!(RangeSpec::From(-20).resolve(10), None);
    }
}
