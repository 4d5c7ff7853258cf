//! LRU replacement keyed by monotonic hit stamps.

use std::collections::HashMap;
use std::time::Instant;

use super::index::Snapshot;

/// LRU engine: each file carries the stamp of its last hit, measured in
/// microseconds since the engine's `start` reference. Stamps are forced
/// strictly increasing so persisted orderings survive reloads.
#[derive(Debug)]
pub struct Lru {
    start: Instant,
    last: u64,
    entries: HashMap<String, u64>,
}

impl Lru {
    pub fn new() -> Self {
        Self { start: Instant::now(), last: 0, entries: HashMap::new() }
    }

    /// Stamp of the last hit; unknown files order oldest.
    pub fn stamp(&self, name: &str) -> u64 {
        self.entries.get(name).copied().unwrap_or(0)
    }

    /// Registers a file at the current stamp when absent.
    pub fn admit(&mut self, name: &str) {
        if !self.entries.contains_key(name) {
            self.touch(name);
        }
    }

    /// Records a hit, moving the file to most-recent.
    pub fn touch(&mut self, name: &str) {
        let stamp = self.next_stamp();
        self.entries.insert(name.to_owned(), stamp);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn snapshot(&self) -> Snapshot {
        let entries = self.entries.iter().map(|(n, s)| (n.clone(), *s)).collect();
        Snapshot::Lru { entries }
    }

    /// Restores persisted stamps, shifted so the newest stored stamp lands
    /// on the current clock. Every restored stamp then orders before any
    /// future hit.
    pub fn restore(&mut self, entries: Vec<(String, u64)>) {
        let Some(max_stored) = entries.iter().map(|(_, s)| *s).max() else {
            return;
        };
        let now = self.next_stamp();
        for (name, stamp) in entries {
            let shifted = now.saturating_sub(max_stored - stamp);
            self.entries.insert(name, shifted);
        }
        self.last = now;
    }

    fn next_stamp(&mut self) -> u64 {
        let elapsed = self.start.elapsed().as_micros() as u64;
        let stamp = elapsed.max(self.last + 1);
        self.last = stamp;
        stamp
    }
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_strictly_increase() {
        let mut lru = Lru::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("a");
        assert!(lru.stamp("a") > lru.stamp("b"));
        assert_eq!(lru.stamp("unknown"), 0);
    }

    #[test]
    fn admit_does_not_refresh_existing_entries() {
        let mut lru = Lru::new();
        lru.touch("a");
        let before = lru.stamp("a");
        lru.admit("a");
        assert_eq!(lru.stamp("a"), before);
    }

    #[test]
    fn restore_keeps_order_below_future_hits() {
        let mut first = Lru::new();
        first.touch("old");
        first.touch("new");
        let snapshot = first.snapshot();

        let mut second = Lru::new();
        let Snapshot::Lru { entries } = snapshot else {
            panic!("lru snapshot expected");
        };
        second.restore(entries);
        assert!(second.stamp("old") < second.stamp("new"));

        second.touch("fresh");
        assert!(second.stamp("new") < second.stamp("fresh"));
        assert!(second.stamp("old") < second.stamp("fresh"));
    }
}
