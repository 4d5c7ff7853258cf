//! Error types shared across the service.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result of configuration validation.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result of service initialization.
pub type InitResult<T> = std::result::Result<T, InitError>;

/// Errors detected while validating the configuration. All of these are
/// fatal; the process is expected to terminate with the descriptive code.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `refresh` is outside 1..=4294967 seconds.
    RefreshOutOfRange(u64),
    /// `cache` is outside 1..=31536000 seconds.
    CacheOutOfRange(u64),
    /// `cache = "refresh"` was given without a `refresh` period.
    CacheWithoutRefresh,
    /// An unknown `cache` literal.
    CacheUnknown(String),
    /// A replacement algorithm was configured without `files_size`.
    ReplaceWithoutFilesSize,
    /// A replacement algorithm was configured without `refresh`.
    ReplaceWithoutRefresh,
    /// An unknown `replace` value.
    ReplaceUnknown(String),
    /// Write or redirect patterns require HTTP method suffixes.
    WriteWithoutGetSuffix,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefreshOutOfRange(n) => {
                write!(f, "refresh {} outside 1..=4294967 seconds", n)
            }
            Self::CacheOutOfRange(n) => {
                write!(f, "cache {} outside 1..=31536000 seconds", n)
            }
            Self::CacheWithoutRefresh => write!(f, "cache = \"refresh\" requires refresh"),
            Self::CacheUnknown(s) => write!(f, "unknown cache value {:?}", s),
            Self::ReplaceWithoutFilesSize => write!(f, "replace requires files_size"),
            Self::ReplaceWithoutRefresh => write!(f, "replace requires refresh"),
            Self::ReplaceUnknown(s) => write!(f, "unknown replace algorithm {:?}", s),
            Self::WriteWithoutGetSuffix => {
                write!(f, "write/redirect endpoints require use_http_get_suffix")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors detected during service initialization. All of these terminate
/// the process; transient failures after init are logged instead.
#[derive(Debug)]
pub enum InitError {
    /// The configuration failed validation.
    Config(ConfigError),
    /// The root directory could not be enumerated and refresh is disabled,
    /// so the failure can never heal ("enoent").
    DirectoryUnreachable(PathBuf, io::Error),
    /// A write pattern matched no file in the table ("enoent").
    WritePatternUnmatched(String),
    /// A redirect pattern matched no file in the table ("enoent").
    RedirectPatternUnmatched(String),
    /// A notify pattern matched no file in the table ("enoent").
    NotifyPatternUnmatched(String),
    /// A read target was declared writable but the filesystem access mode
    /// does not permit writing ("eacces").
    ReadTargetNotWritable(String),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {}", e),
            Self::DirectoryUnreachable(dir, e) => {
                write!(f, "enoent: directory {:?} unreachable: {}", dir, e)
            }
            Self::WritePatternUnmatched(p) => {
                write!(f, "enoent: write pattern {:?} matched no files", p)
            }
            Self::RedirectPatternUnmatched(p) => {
                write!(f, "enoent: redirect pattern {:?} matched no files", p)
            }
            Self::NotifyPatternUnmatched(p) => {
                write!(f, "enoent: notify pattern {:?} matched no files", p)
            }
            Self::ReadTargetNotWritable(name) => {
                write!(f, "eacces: read target {:?} is not writable", name)
            }
        }
    }
}

impl std::error::Error for InitError {}

impl From<ConfigError> for InitError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
