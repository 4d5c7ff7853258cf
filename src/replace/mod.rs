//! Cache replacement: decides which files stay in memory when the byte
//! ceiling is tight, and persists its bookkeeping across restarts.

pub mod index;
pub mod lfuda;
pub mod lru;

pub use index::Snapshot;
pub use lfuda::{Lfuda, Policy};
pub use lru::Lru;

use crate::config::ReplaceMode;

/// The active replacement engine.
#[derive(Debug)]
pub enum Replacer {
    Lfuda(Lfuda),
    Lru(Lru),
}

impl Replacer {
    /// Builds the engine for a configured mode; `None` when replacement is
    /// disabled.
    pub fn from_mode(mode: ReplaceMode) -> Option<Self> {
        match mode {
            ReplaceMode::None => None,
            ReplaceMode::Lfuda => Some(Self::Lfuda(Lfuda::new(Policy::Lfuda))),
            ReplaceMode::LfudaGdsf => Some(Self::Lfuda(Lfuda::new(Policy::Gdsf))),
            ReplaceMode::Lru => Some(Self::Lru(Lru::new())),
        }
    }

    /// Priority key used to order refresh admission; higher is kept first.
    /// Unknown files default to the aging floor.
    pub fn priority(&self, name: &str) -> u64 {
        match self {
            Self::Lfuda(l) => l.key(name),
            Self::Lru(l) => l.stamp(name),
        }
    }

    /// Registers a file entering the table without a request hit.
    pub fn admit(&mut self, name: &str) {
        match self {
            Self::Lfuda(l) => l.admit(name),
            Self::Lru(l) => l.admit(name),
        }
    }

    /// Records a successful response for `name` of current size `size`.
    pub fn hit(&mut self, name: &str, size: u64) {
        match self {
            Self::Lfuda(l) => l.hit(name, size),
            Self::Lru(l) => l.touch(name),
        }
    }

    /// Removes a file, aging the engine when its priority exceeded the
    /// current floor.
    pub fn remove(&mut self, name: &str) {
        match self {
            Self::Lfuda(l) => l.remove(name),
            Self::Lru(l) => l.remove(name),
        }
    }

    /// Serializable view of the current index.
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Self::Lfuda(l) => l.snapshot(),
            Self::Lru(l) => l.snapshot(),
        }
    }

    /// Restores a persisted index. Returns `false` (and changes nothing)
    /// when the snapshot was written by a different replacement type.
    pub fn restore(&mut self, snapshot: Snapshot) -> bool {
        match (self, snapshot) {
            (Self::Lfuda(l), Snapshot::Lfuda { policy, entries }) if l.policy() == policy => {
                l.restore(entries);
                true
            }
            (Self::Lru(l), Snapshot::Lru { entries }) => {
                l.restore(entries);
                true
            }
            _ => false,
        }
    }
}
