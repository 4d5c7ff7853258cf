//! Persistence of the replacement index in a sidecar file.
//!
//! The sidecar lives in the served directory under a reserved name prefix
//! (which the scanner skips) and is written atomically: the payload goes
//! to a `_tmp` companion that is then renamed into place. The payload is a
//! tagged binary record: type tag, entry count, then length-prefixed
//! filenames with fixed-width values in big-endian order.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};
use tokio::fs;
use tracing::{debug, warn};

use super::lfuda::Policy;

/// Reserved filename prefix; scans skip anything under it.
pub const RESERVED_PREFIX: &str = ".fsorigin-index";

const MAGIC: u32 = 0x4653_4f49; // "FSOI"
const VERSION: u8 = 1;

/// Replacement type tag stored in the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum IndexKind {
    Lfuda = 1,
    LfudaGdsf = 2,
    Lru = 3,
}

/// A serializable view of a replacement engine's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// LFUDA entries as `(filename, key - age, hits)`; the key offset is
    /// rebased onto the loader's age.
    Lfuda { policy: Policy, entries: Vec<(String, i64, u64)> },
    /// LRU entries as `(filename, stamp)`.
    Lru { entries: Vec<(String, u64)> },
}

impl Snapshot {
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Lfuda { policy: Policy::Lfuda, .. } => IndexKind::Lfuda,
            Self::Lfuda { policy: Policy::Gdsf, .. } => IndexKind::LfudaGdsf,
            Self::Lru { .. } => IndexKind::Lru,
        }
    }
}

/// Sidecar decode failures. All of them are non-fatal: the index is
/// rebuilt from scratch.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    BadMagic,
    BadVersion(u8),
    UnknownKind(u8),
    NameNotUtf8,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "truncated or unreadable index: {}", e),
            Self::BadMagic => write!(f, "not a replacement index"),
            Self::BadVersion(v) => write!(f, "unsupported index version {}", v),
            Self::UnknownKind(k) => write!(f, "unknown replacement type tag {}", k),
            Self::NameNotUtf8 => write!(f, "index filename is not utf-8"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Path of the sidecar for one process index.
pub fn sidecar_path(root: &Path, process_index: u32) -> PathBuf {
    root.join(format!("{}.{}", RESERVED_PREFIX, process_index))
}

pub fn encode(snapshot: &Snapshot) -> Vec<u8> {
    let mut out = Vec::new();
    // Writes into a Vec cannot fail.
    out.write_u32::<BigEndian>(MAGIC).unwrap();
    out.write_u8(VERSION).unwrap();
    out.write_u8(snapshot.kind().to_u8().unwrap()).unwrap();
    match snapshot {
        Snapshot::Lfuda { entries, .. } => {
            out.write_u32::<BigEndian>(entries.len() as u32).unwrap();
            for (name, delta, hits) in entries {
                write_name(&mut out, name);
                out.write_i64::<BigEndian>(*delta).unwrap();
                out.write_u64::<BigEndian>(*hits).unwrap();
            }
        }
        Snapshot::Lru { entries } => {
            out.write_u32::<BigEndian>(entries.len() as u32).unwrap();
            for (name, stamp) in entries {
                write_name(&mut out, name);
                out.write_u64::<BigEndian>(*stamp).unwrap();
            }
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut src = Cursor::new(bytes);
    if src.read_u32::<BigEndian>()? != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = src.read_u8()?;
    if version != VERSION {
        return Err(Error::BadVersion(version));
    }
    let tag = src.read_u8()?;
    let kind = IndexKind::from_u8(tag).ok_or(Error::UnknownKind(tag))?;
    let count = src.read_u32::<BigEndian>()?;
    match kind {
        IndexKind::Lfuda | IndexKind::LfudaGdsf => {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = read_name(&mut src)?;
                let delta = src.read_i64::<BigEndian>()?;
                let hits = src.read_u64::<BigEndian>()?;
                entries.push((name, delta, hits));
            }
            let policy = match kind {
                IndexKind::Lfuda => Policy::Lfuda,
                _ => Policy::Gdsf,
            };
            Ok(Snapshot::Lfuda { policy, entries })
        }
        IndexKind::Lru => {
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = read_name(&mut src)?;
                let stamp = src.read_u64::<BigEndian>()?;
                entries.push((name, stamp));
            }
            Ok(Snapshot::Lru { entries })
        }
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.write_u16::<BigEndian>(name.len() as u16).unwrap();
    out.extend_from_slice(name.as_bytes());
}

fn read_name(src: &mut Cursor<&[u8]>) -> Result<String> {
    let len = src.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::NameNotUtf8)
}

/// Writes the sidecar atomically: `_tmp` companion, then rename.
pub async fn store(root: &Path, process_index: u32, snapshot: &Snapshot) -> std::io::Result<()> {
    let path = sidecar_path(root, process_index);
    let tmp = path.with_file_name(format!(
        "{}_tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    fs::write(&tmp, encode(snapshot)).await?;
    fs::rename(&tmp, &path).await?;
    debug!(path = %path.display(), "replacement index persisted");
    Ok(())
}

/// Loads the sidecar. A missing file is normal; a malformed one is logged
/// and ignored.
pub async fn load(root: &Path, process_index: u32) -> Option<Snapshot> {
    let path = sidecar_path(root, process_index);
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read replacement index");
            return None;
        }
    };
    match decode(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed replacement index");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfuda_codec_round_trips() {
        let snapshot = Snapshot::Lfuda {
            policy: Policy::Lfuda,
            entries: vec![("a.txt".into(), 3, 7), ("dir/b.txt".into(), -2, 1)],
        };
        assert_eq!(decode(&encode(&snapshot)).expect("decode"), snapshot);
    }

    #[test]
    fn lru_codec_round_trips() {
        let snapshot = Snapshot::Lru {
            entries: vec![("a.txt".into(), 17), ("b.txt".into(), 4)],
        };
        assert_eq!(decode(&encode(&snapshot)).expect("decode"), snapshot);
    }

    #[test]
    fn rejects_foreign_and_truncated_payloads() {
        assert!(matches!(decode(b"not an index"), Err(Error::BadMagic)));

        let snapshot = Snapshot::Lru { entries: vec![("a.txt".into(), 17)] };
        let bytes = encode(&snapshot);
        assert!(matches!(decode(&bytes[..bytes.len() - 4]), Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn store_replaces_atomically_and_load_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = Snapshot::Lru { entries: vec![("a.txt".into(), 9)] };

        store(dir.path(), 0, &snapshot).await.expect("store");
        assert!(sidecar_path(dir.path(), 0).exists());
        assert_eq!(load(dir.path(), 0).await, Some(snapshot));

        // Mismatched process indexes read nothing.
        assert_eq!(load(dir.path(), 1).await, None);
    }
}
