//! Directory scanning: enumerate the files the table may expose.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use crate::name;
use crate::record::{Access, Segment};

/// One file surfaced by a scan. Contents are read later, at admission.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Absolute path.
    pub path: PathBuf,
    /// Logical name relative to the root, `/`-separated.
    pub name: String,
    pub mtime: SystemTime,
    pub access: Access,
    /// Size of the file on disk (before segment limits).
    pub file_size: u64,
    pub segment: Segment,
}

/// Enumerates `root`. With an empty allow-list every regular file below the
/// root is surfaced, skipping names under the reserved sidecar prefix.
/// With an allow-list only the listed names are surfaced, each with its
/// byte segment. Unreadable or non-regular entries are logged and skipped.
pub async fn scan(
    root: &Path,
    allowlist: &[(String, Segment)],
    reserved_prefix: &str,
) -> io::Result<Vec<ScanEntry>> {
    if allowlist.is_empty() {
        scan_recursive(root, reserved_prefix).await
    } else {
        Ok(scan_allowlist(root, allowlist).await)
    }
}

async fn scan_recursive(root: &Path, reserved_prefix: &str) -> io::Result<Vec<ScanEntry>> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    // The root itself must be enumerable; deeper failures are non-fatal.
    let mut first = true;

    while let Some(dir) = pending.pop() {
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if first => return Err(e),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        first = false;

        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "directory enumeration interrupted");
                    break;
                }
            };
            let path = entry.path();
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            if !metadata.is_file() {
                debug!(path = %path.display(), "skipping non-regular file");
                continue;
            }
            let Some(logical) = logical_name(root, &path) else {
                warn!(path = %path.display(), "skipping non-unicode filename");
                continue;
            };
            if logical.starts_with(reserved_prefix) {
                continue;
            }
            if name::has_metacharacters(&logical) {
                warn!(name = %logical, "skipping filename with pattern metacharacters");
                continue;
            }
            entries.push(ScanEntry {
                path,
                name: logical,
                mtime: mtime_of(&metadata),
                access: access_of(&metadata),
                file_size: metadata.len(),
                segment: Segment::default(),
            });
        }
    }
    Ok(entries)
}

async fn scan_allowlist(root: &Path, allowlist: &[(String, Segment)]) -> Vec<ScanEntry> {
    let mut entries = Vec::new();
    for (logical, segment) in allowlist {
        if name::has_metacharacters(logical) {
            warn!(name = %logical, "skipping read target with pattern metacharacters");
            continue;
        }
        let path = root.join(logical);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(name = %logical, error = %e, "skipping unreadable read target");
                continue;
            }
        };
        if !metadata.is_file() {
            warn!(name = %logical, "skipping non-regular read target");
            continue;
        }
        entries.push(ScanEntry {
            path,
            name: logical.clone(),
            mtime: mtime_of(&metadata),
            access: access_of(&metadata),
            file_size: metadata.len(),
            segment: *segment,
        });
    }
    entries
}

/// Reads the segment of `path` selected by `segment`. A negative offset
/// counts back from EOF; a missing length reads to EOF.
pub async fn read_segment(path: &Path, segment: Segment) -> io::Result<Vec<u8>> {
    let bytes = fs::read(path).await?;
    match segment {
        Segment { offset: None, length: None } => Ok(bytes),
        Segment { offset, length } => {
            let len = bytes.len() as u64;
            let start = match offset.unwrap_or(0) {
                o if o >= 0 => (o as u64).min(len),
                o => len.saturating_sub(o.unsigned_abs()),
            };
            let end = match length {
                Some(l) => (start + l).min(len),
                None => len,
            };
            Ok(bytes[start as usize..end as usize].to_vec())
        }
    }
}

/// In-memory bytes a segment of a `file_size`-byte file will occupy.
pub fn segment_len(file_size: u64, segment: Segment) -> u64 {
    let start = match segment.offset.unwrap_or(0) {
        o if o >= 0 => (o as u64).min(file_size),
        o => file_size.saturating_sub(o.unsigned_abs()),
    };
    let end = match segment.length {
        Some(l) => (start + l).min(file_size),
        None => file_size,
    };
    end - start
}

fn mtime_of(metadata: &std::fs::Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(unix)]
pub(crate) fn access_of(metadata: &std::fs::Metadata) -> Access {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    match (mode & 0o400 != 0, mode & 0o200 != 0) {
        (true, true) => Access::ReadWrite,
        (true, false) => Access::Read,
        (false, true) => Access::Write,
        (false, false) => Access::None,
    }
}

#[cfg(not(unix))]
pub(crate) fn access_of(metadata: &std::fs::Metadata) -> Access {
    if metadata.permissions().readonly() {
        Access::Read
    } else {
        Access::ReadWrite
    }
}

fn logical_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in relative.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(component.as_os_str().to_str()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recursive_scan_finds_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"abc").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/b.txt"), b"defg").expect("write");

        let mut entries = scan(dir.path(), &[], ".fsorigin-index").await.expect("scan");
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(entries[1].file_size, 4);
    }

    #[tokio::test]
    async fn reserved_sidecar_names_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"abc").expect("write");
        std::fs::write(dir.path().join(".fsorigin-index.0"), b"junk").expect("write");

        let entries = scan(dir.path(), &[], ".fsorigin-index").await.expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[tokio::test]
    async fn allowlist_reads_only_listed_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"abc").expect("write");
        std::fs::write(dir.path().join("b.txt"), b"def").expect("write");

        let list = vec![("b.txt".to_owned(), Segment::default())];
        let entries = scan(dir.path(), &list, ".fsorigin-index").await.expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b.txt");
    }

    #[tokio::test]
    async fn segments_select_byte_windows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").expect("write");

        let tail = read_segment(&path, Segment { offset: Some(-3), length: None })
            .await
            .expect("read");
        assert_eq!(tail, b"789");

        let window = read_segment(&path, Segment { offset: Some(2), length: Some(4) })
            .await
            .expect("read");
        assert_eq!(window, b"2345");

        let clamped = read_segment(&path, Segment { offset: Some(8), length: Some(10) })
            .await
            .expect("read");
        assert_eq!(clamped, b"89");
    }
}
