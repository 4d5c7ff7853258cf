//! Service configuration.
//!
//! All knobs are optional except `directory`. Validation happens once, at
//! initialization; every violation is fatal.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::record::Segment;

const REFRESH_MAX: u64 = 4_294_967;
const CACHE_MAX: u64 = 31_536_000;

/// Replacement algorithm selection: `false`, `"lfuda"`, `"lfuda_gdsf"` or
/// `"lru"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ReplaceModeRepr")]
pub enum ReplaceMode {
    #[default]
    None,
    Lfuda,
    LfudaGdsf,
    Lru,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplaceModeRepr {
    Flag(bool),
    Name(String),
}

impl TryFrom<ReplaceModeRepr> for ReplaceMode {
    type Error = String;

    fn try_from(repr: ReplaceModeRepr) -> Result<Self, String> {
        match repr {
            ReplaceModeRepr::Flag(false) => Ok(Self::None),
            ReplaceModeRepr::Flag(true) => {
                Err("replace = true is ambiguous; name an algorithm".to_owned())
            }
            ReplaceModeRepr::Name(name) => match name.as_str() {
                "lfuda" => Ok(Self::Lfuda),
                "lfuda_gdsf" => Ok(Self::LfudaGdsf),
                "lru" => Ok(Self::Lru),
                other => Err(ConfigError::ReplaceUnknown(other.to_owned()).to_string()),
            },
        }
    }
}

/// HTTP cache lifetime: a seconds count, or the literal `"refresh"` for
/// `max(refresh / 2, 1)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CacheSetting {
    Seconds(u64),
    Literal(String),
}

/// One allow-listed read target: a bare name, or a name with a byte
/// segment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ReadTarget {
    Name(String),
    Segmented {
        name: String,
        #[serde(default)]
        offset: Option<i64>,
        #[serde(default)]
        length: Option<u64>,
    },
}

impl ReadTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Segmented { name, .. } => name,
        }
    }

    pub fn segment(&self) -> Segment {
        match self {
            Self::Name(_) => Segment::default(),
            Self::Segmented { offset, length, .. } => {
                Segment { offset: *offset, length: *length }
            }
        }
    }
}

/// A redirect rule: files matching `pattern` answer 301 toward the name
/// built from `target`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Redirect {
    pub pattern: String,
    pub target: String,
}

/// A notification rule: contents of files matching `pattern` are sent to
/// `name`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notify {
    pub pattern: String,
    pub name: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_ms: u32,
    #[serde(default)]
    pub priority: i8,
}

fn default_notify_timeout() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the served directory. Required.
    pub directory: PathBuf,
    /// Byte ceiling across in-memory contents, in KiB.
    #[serde(default)]
    pub files_size: Option<u64>,
    /// Rescan period in seconds (1..=4294967); absent disables refresh.
    #[serde(default)]
    pub refresh: Option<u64>,
    /// HTTP cache lifetime; enables cache-control emission.
    #[serde(default)]
    pub cache: Option<CacheSetting>,
    #[serde(default)]
    pub replace: ReplaceMode,
    /// Persist the replacement index across restarts.
    #[serde(default = "default_true")]
    pub replace_index: bool,
    /// Allow-list; empty means "serve the whole directory".
    #[serde(default)]
    pub read: Vec<ReadTarget>,
    #[serde(default)]
    pub write_truncate: Vec<String>,
    #[serde(default)]
    pub write_append: Vec<String>,
    #[serde(default)]
    pub redirect: Vec<Redirect>,
    #[serde(default)]
    pub notify_one: Vec<Notify>,
    #[serde(default)]
    pub notify_all: Vec<Notify>,
    /// Deliver notifications during initialization.
    #[serde(default = "default_true")]
    pub notify_on_start: bool,
    /// Tolerated client clock skew into the future, in seconds.
    #[serde(default)]
    pub http_clock_skew_max: Option<u64>,
    #[serde(default = "default_true")]
    pub use_content_types: bool,
    #[serde(default)]
    pub use_content_disposition: bool,
    #[serde(default)]
    pub use_expires: bool,
    /// Route by `/get`-style method suffixes; disabling leaves one
    /// read-only subscription per file.
    #[serde(default = "default_true")]
    pub use_http_get_suffix: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_debug_level")]
    pub debug_level: String,
}

fn default_debug_level() -> String {
    "debug".to_owned()
}

impl Config {
    /// A minimal configuration serving `directory` with defaults.
    pub fn for_directory(directory: impl Into<PathBuf>) -> Self {
        toml::from_str::<Self>(&format!(
            "directory = {:?}",
            directory.into().to_string_lossy()
        ))
        .expect("default configuration parses")
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(refresh) = self.refresh {
            if !(1..=REFRESH_MAX).contains(&refresh) {
                return Err(ConfigError::RefreshOutOfRange(refresh));
            }
        }
        match &self.cache {
            Some(CacheSetting::Seconds(s)) if !(1..=CACHE_MAX).contains(s) => {
                return Err(ConfigError::CacheOutOfRange(*s));
            }
            Some(CacheSetting::Literal(l)) if l != "refresh" => {
                return Err(ConfigError::CacheUnknown(l.clone()));
            }
            Some(CacheSetting::Literal(_)) if self.refresh.is_none() => {
                return Err(ConfigError::CacheWithoutRefresh);
            }
            _ => {}
        }
        if self.replace != ReplaceMode::None {
            if self.files_size.is_none() {
                return Err(ConfigError::ReplaceWithoutFilesSize);
            }
            if self.refresh.is_none() {
                return Err(ConfigError::ReplaceWithoutRefresh);
            }
        }
        if !self.use_http_get_suffix
            && (!self.write_truncate.is_empty()
                || !self.write_append.is_empty()
                || !self.redirect.is_empty())
        {
            return Err(ConfigError::WriteWithoutGetSuffix);
        }
        Ok(())
    }

    /// Ceiling in bytes.
    pub fn files_size_bytes(&self) -> Option<u64> {
        self.files_size.map(|kib| kib * 1024)
    }

    /// Effective HTTP cache lifetime in seconds, when caching is enabled.
    pub fn cache_seconds(&self) -> Option<u64> {
        match &self.cache {
            None => None,
            Some(CacheSetting::Seconds(s)) => Some(*s),
            Some(CacheSetting::Literal(_)) => {
                Some((self.refresh.unwrap_or(2) / 2).max(1))
            }
        }
    }
}
