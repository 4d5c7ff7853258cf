//! fsorigin: a filesystem-backed HTTP content origin service.
//!
//! Given a directory, the service loads file contents into memory, exposes
//! each file (plus synthetic index aliases) as a named endpoint, keeps the
//! in-memory copy consistent with the filesystem through periodic rescans,
//! enforces a global byte budget via LFUDA/GDSF/LRU replacement, and
//! answers requests with HTTP caching and byte-range semantics, including
//! truncating writes and multipart byte-range appends.
//!
//! File-content writes go directly to the target path, so there is no
//! atomicity guarantee against concurrent external writers of the same
//! file; the restat after a write is authoritative for the new
//! generation's mtime. Only the replacement-index sidecar is written via
//! temp-file-and-rename.

pub mod append;
pub mod budget;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod http;
pub mod mime;
pub mod name;
pub mod notify;
pub mod record;
pub mod replace;
pub mod scan;
pub mod service;
pub mod table;

pub use config::Config;
pub use dispatch::{Dispatch, SendMode};
pub use error::{ConfigError, InitError};
pub use service::messages::{Request, Response, ServiceSender};
pub use service::Service;
