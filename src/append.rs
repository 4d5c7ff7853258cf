//! Byte-range append writes and multipart reassembly.
//!
//! A POST either carries one terminal chunk or joins a multipart upload
//! keyed by `x-multipart-id`. Chunks buffer per id until the terminal
//! chunk (or the per-id timeout) and are then spliced into the in-memory
//! contents in index order.

use std::time::SystemTime;

use crate::headers::{self, Headers, RangeHeader, RangeSpec};
use crate::http::{self, Status};
use crate::record::PendingChunk;

/// The resolved shape of one POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendParams {
    /// Byte range this chunk writes; `None` appends at EOF.
    pub range: Option<RangeSpec>,
    /// Multipart upload id grouping related chunks.
    pub id: Option<String>,
    /// Whether this chunk completes the upload.
    pub is_last: bool,
    /// Position of this chunk within the upload.
    pub index: u32,
}

/// Determines `(range, id, is_last, index)` for a POST, or the status that
/// short-circuits it.
pub fn resolve_params(
    info: &Headers,
    etag: &str,
    mtime: SystemTime,
) -> Result<AppendParams, Status> {
    let id = info.get_str("x-multipart-id").map(str::to_owned);
    let index = match info.get_str("x-multipart-index") {
        None => None,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(i) => Some(i),
            Err(_) => return Err(Status::BadRequest),
        },
    };
    let last = info
        .get_str("x-multipart-last")
        .map(|raw| raw.trim().eq_ignore_ascii_case("true"));

    let specs = match info.get("range") {
        None => None,
        Some(raw) => match headers::parse_range(raw) {
            RangeHeader::Bytes(specs) => Some(specs),
            RangeHeader::NotBytes => return Err(Status::RangeNotSatisfiable),
            RangeHeader::Malformed => return Err(Status::BadRequest),
        },
    };
    if specs.is_some() {
        if let Some(value) = info.get("if-range") {
            if !http::if_range_matches(value, etag, mtime) {
                return Err(Status::Gone);
            }
        }
    }

    match specs.as_deref() {
        None => Ok(AppendParams {
            range: None,
            id,
            is_last: last.unwrap_or(true),
            index: index.unwrap_or(0),
        }),
        Some([single]) => Ok(AppendParams {
            range: Some(*single),
            id,
            is_last: last.unwrap_or(true),
            index: index.unwrap_or(0),
        }),
        Some(multiple) => {
            // The index selects one sub-range, so it cannot be defaulted.
            let Some(index) = index else {
                return Err(Status::BadRequest);
            };
            let Some(range) = multiple.get(index as usize) else {
                return Err(Status::BadRequest);
            };
            Ok(AppendParams {
                range: Some(*range),
                id,
                is_last: last.unwrap_or(index as usize == multiple.len() - 1),
                index,
            })
        }
    }
}

/// Splices one chunk into `contents`.
///
/// The write region starts at the resolved range start (negative counts
/// from EOF) and covers the payload, or the stated end when the range has
/// one. Interior regions are overwritten in place, regions reaching the
/// tail truncate to the payload end, a start at the length appends, and a
/// start past the length zero-fills the gap.
pub fn apply_chunk(
    contents: &mut Vec<u8>,
    range: Option<RangeSpec>,
    payload: &[u8],
) -> Result<(), Status> {
    let len = contents.len() as u64;
    let (start, explicit_end) = match range {
        None => (len, None),
        Some(spec) => match spec.write_bounds(len) {
            Some(bounds) => bounds,
            None => return Err(Status::RangeNotSatisfiable),
        },
    };
    let end = match explicit_end {
        Some(end) => end,
        None => match start.checked_add(payload.len() as u64).and_then(|e| e.checked_sub(1)) {
            Some(end) => end,
            None => return Err(Status::RangeNotSatisfiable),
        },
    };
    if start > end {
        return Err(Status::RangeNotSatisfiable);
    }

    let write_len = ((end - start + 1) as usize).min(payload.len());
    let start = start as usize;
    let write_end = start + write_len;
    if start >= contents.len() {
        contents.resize(start, 0);
        contents.extend_from_slice(&payload[..write_len]);
    } else if write_end >= contents.len() {
        contents.truncate(start);
        contents.extend_from_slice(&payload[..write_len]);
    } else {
        contents[start..write_end].copy_from_slice(&payload[..write_len]);
    }
    Ok(())
}

/// Applies buffered chunks in index order to a copy of `contents`.
pub fn apply_chunks(contents: &[u8], chunks: &[PendingChunk]) -> Result<Vec<u8>, Status> {
    let mut out = contents.to_vec();
    for chunk in chunks {
        apply_chunk(&mut out, chunk.range, &chunk.payload)?;
    }
    Ok(out)
}
