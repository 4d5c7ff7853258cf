//! HTTP conditional and byte-range semantics.
//!
//! Runs on every read: evaluate the precondition headers against the
//! record's validators, then the `range` header against its contents, and
//! emit the response pairs. Date comparisons are at whole-second
//! granularity, matching the RFC1123 representation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use num_traits::ToPrimitive;

use crate::headers::{self, Headers, RangeHeader};

/// Response statuses the service emits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive,
)]
pub enum Status {
    Ok = 200,
    PartialContent = 206,
    MovedPermanently = 301,
    NotModified = 304,
    BadRequest = 400,
    NotFound = 404,
    Gone = 410,
    PreconditionFailed = 412,
    RangeNotSatisfiable = 416,
}

impl Status {
    pub fn code(self) -> u16 {
        self.to_u16().expect("status codes fit u16")
    }
}

/// Protocol knobs derived from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolConfig {
    /// Tolerated client clock skew into the future, seconds.
    pub clock_skew_max: Option<u64>,
    /// Cache lifetime for `cache-control`, seconds; `None` disables it.
    pub cache_seconds: Option<u64>,
    /// Emit `expires` instead of `max-age`.
    pub use_expires: bool,
    /// Advertise `accept-ranges: bytes`.
    pub accept_ranges: bool,
}

/// Result of the precondition ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

/// Result of range evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable range; serve the whole body.
    Full,
    /// Inclusive satisfiable ranges, in header order.
    Partial(Vec<(u64, u64)>),
    /// Unparseable `range` header.
    Malformed,
    /// A range unit other than bytes, or an unsatisfiable range.
    NotSatisfiable,
    /// `if-range` no longer matches the representation.
    Stale,
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

fn parse_date(value: &[u8]) -> Option<u64> {
    let value = std::str::from_utf8(value).ok()?;
    httpdate::parse_http_date(value.trim()).ok().map(unix_seconds)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Evaluates `if-none-match`, `if-match`, `if-modified-since` and
/// `if-unmodified-since`, in that order. The first decisive header wins.
pub fn preconditions(
    info: &Headers,
    etag: &str,
    mtime: SystemTime,
    now: SystemTime,
    config: &ProtocolConfig,
) -> Precondition {
    let mtime = unix_seconds(mtime);
    let ceiling = config.clock_skew_max.map(|skew| unix_seconds(now) + skew);

    if let Some(value) = info.get("if-none-match") {
        if value == b"*" || contains(value, etag.as_bytes()) {
            return Precondition::NotModified;
        }
    }
    if let Some(value) = info.get("if-match") {
        if value != b"*" && !contains(value, etag.as_bytes()) {
            return Precondition::Failed;
        }
    }
    if let Some(value) = info.get("if-modified-since") {
        if let Some(date) = parse_date(value) {
            let future_invalid = ceiling.is_some_and(|c| date > c);
            return if mtime > date || future_invalid {
                Precondition::Proceed
            } else {
                Precondition::NotModified
            };
        }
    }
    if let Some(value) = info.get("if-unmodified-since") {
        if let Some(date) = parse_date(value) {
            if mtime <= date && ceiling.map_or(true, |c| date <= c) {
                return Precondition::Failed;
            }
        }
    }
    Precondition::Proceed
}

/// Evaluates the `range` and `if-range` headers against a body of
/// `content_length` bytes.
pub fn ranges(
    info: &Headers,
    etag: &str,
    mtime: SystemTime,
    content_length: u64,
) -> RangeOutcome {
    let Some(raw) = info.get("range") else {
        return RangeOutcome::Full;
    };
    let specs = match headers::parse_range(raw) {
        RangeHeader::Bytes(specs) => specs,
        RangeHeader::NotBytes => return RangeOutcome::NotSatisfiable,
        RangeHeader::Malformed => return RangeOutcome::Malformed,
    };
    if let Some(value) = info.get("if-range") {
        if !if_range_matches(value, etag, mtime) {
            return RangeOutcome::Stale;
        }
    }
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in &specs {
        match spec.resolve(content_length) {
            Some((start, end)) if start <= end && end < content_length => {
                resolved.push((start, end));
            }
            _ => return RangeOutcome::NotSatisfiable,
        }
    }
    RangeOutcome::Partial(resolved)
}

/// `if-range` honors ranges when it equals the current ETag, or parses as
/// a date equal to the modification time.
pub fn if_range_matches(value: &[u8], etag: &str, mtime: SystemTime) -> bool {
    let trimmed: &[u8] = {
        let s = value;
        let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
        let end = s.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
        &s[start..end]
    };
    if trimmed == etag.as_bytes() {
        return true;
    }
    parse_date(trimmed) == Some(unix_seconds(mtime))
}

/// Validator and caching pairs common to every response.
pub fn response_headers(
    status: Status,
    etag: &str,
    mtime: SystemTime,
    now: SystemTime,
    config: &ProtocolConfig,
) -> Headers {
    let mut out = Headers::new();
    out.push("status", status.code().to_string());
    out.push("etag", etag.as_bytes().to_vec());
    out.push("last-modified", httpdate::fmt_http_date(mtime));
    out.push("date", httpdate::fmt_http_date(now));
    if let Some(seconds) = config.cache_seconds {
        if config.use_expires {
            out.push("cache-control", "public");
            out.push(
                "expires",
                httpdate::fmt_http_date(now + Duration::from_secs(seconds)),
            );
        } else {
            out.push("cache-control", format!("public,max-age={}", seconds));
        }
    }
    if config.accept_ranges {
        out.push("accept-ranges", "bytes");
    }
    out
}

/// Headers and body for a 206 response over `parts`.
pub fn partial_body(
    contents: &[u8],
    parts: &[(u64, u64)],
    boundary_stamp: u64,
    boundary_counter: u32,
) -> (Headers, Vec<u8>) {
    let total = contents.len() as u64;
    let mut out = Headers::new();
    if let [(start, end)] = parts {
        out.push("content-type", "application/octet-stream");
        out.push("content-range", format!("bytes {}-{}/{}", start, end, total));
        let body = contents[*start as usize..=*end as usize].to_vec();
        return (out, body);
    }

    let boundary = headers::multipart_boundary(boundary_stamp, boundary_counter);
    out.push(
        "content-type",
        format!("multipart/byteranges; boundary={}", boundary),
    );
    let mut body = Vec::new();
    for (start, end) in parts {
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"\r\ncontent-type: application/octet-stream\r\n");
        body.extend_from_slice(
            format!("content-range: bytes {}-{}/{}\r\n\r\n", start, end, total).as_bytes(),
        );
        body.extend_from_slice(&contents[*start as usize..=*end as usize]);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");
    (out, body)
}

/// Headers for a 416 answer: `content-range: bytes */N`. The
/// `accept-ranges` pair comes from [`response_headers`].
pub fn unsatisfiable_headers(content_length: u64) -> Headers {
    let mut out = Headers::new();
    out.push("content-range", format!("bytes */{}", content_length));
    out
}
