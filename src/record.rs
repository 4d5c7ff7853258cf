//! In-memory file records and their generation stamps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;

use crate::headers::{Headers, RangeSpec};
use crate::notify::NotifyEntry;

/// Seconds between year 0 of the proleptic Gregorian calendar and the Unix
/// epoch. ETags are derived from Gregorian seconds so they stay positive
/// for any representable mtime.
const GREGORIAN_UNIX_OFFSET: u64 = 62_167_219_200;

/// A modification stamp: the filesystem mtime plus a counter that
/// disambiguates content changes observed within one mtime tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtimeI {
    pub mtime: SystemTime,
    pub counter: u32,
}

impl MtimeI {
    pub fn new(mtime: SystemTime) -> Self {
        Self { mtime, counter: 0 }
    }

    /// Advances the stamp for a new content generation: the same mtime
    /// bumps the counter, a different mtime resets it.
    pub fn advance(&mut self, mtime: SystemTime) {
        if mtime == self.mtime {
            self.counter += 1;
        } else {
            self.mtime = mtime;
            self.counter = 0;
        }
    }

    /// Whole seconds since the Unix epoch, clamped at zero.
    pub fn unix_seconds(&self) -> u64 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    /// The entity tag for this generation, quotes included.
    pub fn etag(&self) -> String {
        let gregorian = self.unix_seconds() + GREGORIAN_UNIX_OFFSET;
        format!("\"{:x}{:x}\"", gregorian, self.counter)
    }

    /// Stable stamp for boundary generation.
    pub fn stamp(&self) -> u64 {
        self.unix_seconds()
            .wrapping_mul(1 << 32)
            .wrapping_add(self.counter as u64)
    }
}

/// Filesystem access mode observed at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    None,
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Which write methods an endpoint exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSet {
    pub truncate: bool,
    pub append: bool,
}

impl WriteSet {
    pub fn is_empty(self) -> bool {
        !self.truncate && !self.append
    }
}

/// Byte segment limits for allow-listed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    /// Segment start; negative counts back from EOF.
    pub offset: Option<i64>,
    /// Segment length; `None` reads to EOF.
    pub length: Option<u64>,
}

/// One buffered append chunk awaiting reassembly.
#[derive(Debug)]
pub struct PendingChunk {
    pub index: u32,
    pub range: Option<RangeSpec>,
    pub payload: Vec<u8>,
}

/// All chunks buffered under one multipart id, ordered by index, plus the
/// expiry timer armed when the first chunk arrived.
#[derive(Debug, Default)]
pub struct PendingUpload {
    pub chunks: Vec<PendingChunk>,
    pub timer: Option<JoinHandle<()>>,
}

impl PendingUpload {
    /// Inserts a chunk keeping indices unique and ascending. A duplicate
    /// index replaces the previous chunk.
    pub fn insert(&mut self, chunk: PendingChunk) {
        match self.chunks.binary_search_by_key(&chunk.index, |c| c.index) {
            Ok(i) => self.chunks[i] = chunk,
            Err(i) => self.chunks.insert(i, chunk),
        }
    }

    /// Cancels the expiry timer. Safe to call after the timer fired.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// An in-memory file: one content generation plus the bookkeeping that
/// keeps it consistent with the filesystem.
#[derive(Debug)]
pub struct FileRecord {
    /// Immutable contents of this generation.
    pub contents: Arc<[u8]>,
    /// Byte length of `contents`.
    pub size: u64,
    /// Absolute filesystem path.
    pub path: PathBuf,
    /// Precomputed response headers (content-type, content-disposition).
    pub headers: Headers,
    /// Generation stamp.
    pub mtime_i: MtimeI,
    /// Filesystem access mode at the last scan.
    pub access: Access,
    /// Scan-cycle marker; records missing from the latest scan keep the
    /// stale value.
    pub toggle: bool,
    /// Notification subscriptions, in configuration order.
    pub notify: Vec<NotifyEntry>,
    /// Write methods granted to this endpoint.
    pub write: WriteSet,
    /// Pending multipart uploads keyed by caller-supplied id.
    pub write_appends: HashMap<String, PendingUpload>,
    /// When set, every request answers 301 toward this name.
    pub redirect: Option<String>,
    /// Allow-list byte segment, if this record came from the read list.
    pub segment: Segment,
}

impl FileRecord {
    pub fn new(path: PathBuf, contents: Vec<u8>, mtime: SystemTime, access: Access) -> Self {
        let size = contents.len() as u64;
        Self {
            contents: contents.into(),
            size,
            path,
            headers: Headers::new(),
            mtime_i: MtimeI::new(mtime),
            access,
            toggle: false,
            notify: Vec::new(),
            write: WriteSet::default(),
            write_appends: HashMap::new(),
            redirect: None,
            segment: Segment::default(),
        }
    }

    /// Replaces the contents with a new generation and advances the stamp.
    pub fn replace_contents(&mut self, contents: Vec<u8>, mtime: SystemTime) {
        self.size = contents.len() as u64;
        self.contents = contents.into();
        self.mtime_i.advance(mtime);
    }

    pub fn etag(&self) -> String {
        self.mtime_i.etag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_differs_across_generations() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut stamp = MtimeI::new(t0);
        let first = stamp.etag();

        stamp.advance(t0);
        let second = stamp.etag();
        assert_ne!(first, second);

        stamp.advance(t0 + Duration::from_secs(1));
        let third = stamp.etag();
        assert_eq!(stamp.counter, 0);
        assert_ne!(second, third);
    }

    #[test]
    fn etag_is_quoted_hex() {
        let stamp = MtimeI::new(UNIX_EPOCH);
        let etag = stamp.etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert!(etag[1..etag.len() - 1]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pending_upload_orders_and_dedupes() {
        let mut upload = PendingUpload::default();
        upload.insert(PendingChunk { index: 2, range: None, payload: b"c".to_vec() });
        upload.insert(PendingChunk { index: 0, range: None, payload: b"a".to_vec() });
        upload.insert(PendingChunk { index: 2, range: None, payload: b"C".to_vec() });

        let indices: Vec<u32> = upload.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(upload.chunks[1].payload, b"C");
    }
}
