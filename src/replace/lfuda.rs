//! LFUDA: least-frequently-used with dynamic aging, with an optional
//! size-aware (GDSF) priority formula.
//!
//! Every file carries a priority key `K`. Evicting a file raises the
//! global `age` to its `K` when higher, so files admitted later start from
//! a higher floor and historically popular but cold files age out.

use std::collections::HashMap;

use super::index::Snapshot;

/// Priority formula applied on a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// `K = hits + age`.
    Lfuda,
    /// `K = hits / ceil(size/1KiB) + age`; bigger files need more hits.
    Gdsf,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: u64,
    hits: u64,
}

/// The LFUDA engine state.
#[derive(Debug)]
pub struct Lfuda {
    policy: Policy,
    /// Non-decreasing aging floor; raised on eviction.
    age: u64,
    entries: HashMap<String, Entry>,
}

impl Lfuda {
    pub fn new(policy: Policy) -> Self {
        Self { policy, age: 0, entries: HashMap::new() }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    /// Current priority key; unknown files default to the aging floor.
    pub fn key(&self, name: &str) -> u64 {
        self.entries.get(name).map(|e| e.key).unwrap_or(self.age)
    }

    /// Registers a file without recording a hit.
    pub fn admit(&mut self, name: &str) {
        let age = self.age;
        self.entries
            .entry(name.to_owned())
            .or_insert(Entry { key: age, hits: 0 });
    }

    /// Records a hit against a file of `size` bytes, creating the entry at
    /// one hit when absent.
    pub fn hit(&mut self, name: &str, size: u64) {
        let age = self.age;
        let entry = self
            .entries
            .entry(name.to_owned())
            .or_insert(Entry { key: age, hits: 0 });
        entry.hits += 1;
        entry.key = match self.policy {
            Policy::Lfuda => entry.hits + age,
            Policy::Gdsf => entry.hits / kib_blocks(size) + age,
        };
    }

    /// Removes a file; a key above the floor raises the floor to it.
    pub fn remove(&mut self, name: &str) {
        if let Some(entry) = self.entries.remove(name) {
            if entry.key > self.age {
                self.age = entry.key;
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let entries = self
            .entries
            .iter()
            .map(|(name, e)| (name.clone(), e.key as i64 - self.age as i64, e.hits))
            .collect();
        Snapshot::Lfuda { policy: self.policy, entries }
    }

    /// Restores persisted entries. Keys were stored relative to the age at
    /// persist time, so they are rebased onto the current floor.
    pub fn restore(&mut self, entries: Vec<(String, i64, u64)>) {
        for (name, delta, hits) in entries {
            let key = (self.age as i64 + delta).max(0) as u64;
            self.entries.insert(name, Entry { key, hits });
        }
    }
}

/// Size in whole KiB blocks, never less than one.
fn kib_blocks(size: u64) -> u64 {
    size.div_ceil(1024).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfuda_key_is_hits_plus_age() {
        let mut lfuda = Lfuda::new(Policy::Lfuda);
        lfuda.hit("a", 4096);
        lfuda.hit("a", 4096);
        assert_eq!(lfuda.key("a"), 2);
        assert_eq!(lfuda.key("unknown"), 0);
    }

    #[test]
    fn gdsf_divides_by_kib_blocks() {
        let mut gdsf = Lfuda::new(Policy::Gdsf);
        for _ in 0..6 {
            gdsf.hit("big", 3 * 1024);
        }
        assert_eq!(gdsf.key("big"), 2);

        // A zero-byte file still divides by one block.
        gdsf.hit("empty", 0);
        assert_eq!(gdsf.key("empty"), 1);
    }

    #[test]
    fn eviction_raises_the_age() {
        let mut lfuda = Lfuda::new(Policy::Lfuda);
        for _ in 0..5 {
            lfuda.hit("hot", 10);
        }
        lfuda.hit("cold", 10);

        lfuda.remove("hot");
        assert_eq!(lfuda.age(), 5);
        // New admissions inherit the raised floor.
        lfuda.admit("new");
        assert_eq!(lfuda.key("new"), 5);

        // Removing a low-priority entry never lowers the age.
        lfuda.remove("cold");
        assert_eq!(lfuda.age(), 5);
    }

    #[test]
    fn snapshot_rebases_on_restore() {
        let mut first = Lfuda::new(Policy::Lfuda);
        first.hit("a", 10);
        first.hit("a", 10);
        first.hit("b", 10);
        let snapshot = first.snapshot();

        let mut second = Lfuda::new(Policy::Lfuda);
        second.remove("unrelated");
        let Snapshot::Lfuda { entries, .. } = snapshot else {
            panic!("lfuda snapshot expected");
        };
        second.restore(entries);
        assert!(second.key("a") > second.key("b"));
    }
}
