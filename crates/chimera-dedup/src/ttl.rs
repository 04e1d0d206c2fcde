use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A set whose members vanish after a fixed TTL.
///
/// Entries self-expire on access and are additionally reaped by [`sweep`].
/// `insert_if_absent` is the whole point: check-and-mark runs under the
/// shard lock of the underlying map, so two concurrent calls with the same
/// key yield exactly one `true`.
///
/// [`sweep`]: TtlSet::sweep
pub struct TtlSet<K: Eq + Hash> {
    entries: DashMap<K, Instant>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone> TtlSet<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Mark `key`, returning `true` iff it was not already live.
    pub fn insert_if_absent(&self, key: K) -> bool {
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                if e.get().elapsed() >= self.ttl {
                    e.insert(Instant::now());
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Instant::now());
                true
            }
        }
    }

    /// Whether `key` is currently live. Removes it when found expired.
    pub fn contains(&self, key: &K) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.elapsed() >= self.ttl,
            None => return false,
        };
        if expired {
            self.entries.remove(key);
            return false;
        }
        true
    }

    pub fn remove(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired entry; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, inserted| inserted.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_wins_second_loses() {
        let set = TtlSet::new(Duration::from_secs(30));
        assert!(set.insert_if_absent("k"));
        assert!(!set.insert_if_absent("k"));
        assert!(set.contains(&"k"));
    }

    #[test]
    fn expired_entry_can_be_remarked() {
        let set = TtlSet::new(Duration::from_millis(0));
        assert!(set.insert_if_absent("k"));
        // TTL of zero: already expired.
        assert!(set.insert_if_absent("k"));
        assert!(!set.contains(&"k"));
    }

    #[test]
    fn sweep_reaps_expired_entries() {
        let set = TtlSet::new(Duration::from_millis(0));
        set.insert_if_absent("a");
        set.insert_if_absent("b");
        assert_eq!(set.sweep(), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn concurrent_marks_yield_exactly_one_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let set = Arc::new(TtlSet::new(Duration::from_secs(30)));
        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let set = Arc::clone(&set);
            let wins = Arc::clone(&wins);
            handles.push(std::thread::spawn(move || {
                if set.insert_if_absent("same-key") {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
