//! # Marten response cache
//!
//! Bounded in-memory cache mapping a question fingerprint to a previously
//! observed response message.
//!
//! Storage is a fixed-length ring buffer plus a `fingerprint → slot` index.
//! Every entry shares one configured lifetime, so insertion order is also
//! expiry order and eviction only ever trims the oldest end of the ring.
//! A full ring of live entries rejects new insertions instead of evicting;
//! `insert` returning `false` is backpressure, not an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hickory_proto::op::Message;
use parking_lot::Mutex;

pub mod key;

pub use key::{canonical_name, question_key};

struct Slot {
    key: String,
    msg: Message,
    expire_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at <= now
    }
}

/// Ring state. The occupied region runs from `begin` to `end` modulo the
/// capacity; `begin == end` means empty when the index is empty, full
/// otherwise.
struct Ring {
    index: HashMap<String, usize>,
    slots: Vec<Option<Slot>>,
    begin: usize,
    end: usize,
}

impl Ring {
    fn real(virt: usize, cap: usize) -> usize {
        virt % cap
    }

    fn virtual_end(&self, cap: usize) -> usize {
        if self.end > self.begin {
            self.end
        } else {
            self.end + cap
        }
    }

    fn virtual_pos(&self, slot: usize, cap: usize) -> usize {
        if slot >= self.begin {
            slot
        } else {
            slot + cap
        }
    }

    /// Evicts slots `[begin, pos]` (virtual indices) and advances `begin`.
    fn evict_through(&mut self, pos: usize, cap: usize) {
        for virt in self.begin..=pos {
            if let Some(slot) = self.slots[Self::real(virt, cap)].take() {
                self.index.remove(&slot.key);
            }
        }
        self.begin = Self::real(pos + 1, cap);
    }

    /// Evicts the leading run of expired entries. Sound because entries are
    /// stored in insertion order and share one lifetime: the first live
    /// entry ends the run.
    fn sweep_expired(&mut self, now: Instant, cap: usize) {
        if self.index.is_empty() {
            return;
        }
        let end = self.virtual_end(cap);
        let mut last_expired = None;
        for virt in self.begin..end {
            match self.slots[Self::real(virt, cap)].as_ref() {
                Some(slot) if slot.is_expired(now) => last_expired = Some(virt),
                _ => break,
            }
        }
        if let Some(pos) = last_expired {
            self.evict_through(pos, cap);
        }
    }
}

/// Bounded FIFO response cache.
///
/// A capacity of zero turns the cache into a permanent miss: `get` returns
/// `None`, `insert` returns `false` and `remove` is a no-op.
pub struct MessageCache {
    cap: usize,
    lifetime: Duration,
    inner: Mutex<Ring>,
}

impl MessageCache {
    /// Creates a cache holding at most `capacity` entries, each expiring
    /// `lifetime` after insertion.
    pub fn new(capacity: usize, lifetime: Duration) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);
        Self {
            cap: capacity,
            lifetime,
            inner: Mutex::new(Ring {
                index: HashMap::new(),
                slots,
                begin: 0,
                end: 0,
            }),
        }
    }

    /// Returns the stored message if `key` is present and not expired.
    ///
    /// Finding an expired entry evicts it together with every earlier entry
    /// (those are at least as old, hence also expired).
    pub fn get(&self, key: &str) -> Option<Message> {
        if self.cap == 0 {
            return None;
        }
        let mut ring = self.inner.lock();
        let slot = *ring.index.get(key)?;
        let now = Instant::now();
        let expired = match ring.slots[slot].as_ref() {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            let pos = ring.virtual_pos(slot, self.cap);
            ring.evict_through(pos, self.cap);
            return None;
        }
        ring.slots[slot].as_ref().map(|entry| entry.msg.clone())
    }

    /// Inserts `msg` under `key`, first reclaiming any trailing run of
    /// expired entries. Returns `false` without inserting when the ring is
    /// full of live entries.
    ///
    /// Callers only insert on a cache miss; inserting a key that is already
    /// present leaves the older entry shadowed in the ring until it ages
    /// out.
    pub fn insert(&self, key: &str, msg: Message) -> bool {
        if self.cap == 0 {
            return false;
        }
        let now = Instant::now();
        let mut ring = self.inner.lock();
        ring.sweep_expired(now, self.cap);
        if ring.begin == ring.end && !ring.index.is_empty() {
            return false;
        }
        let end = ring.end;
        ring.slots[end] = Some(Slot {
            key: key.to_owned(),
            msg,
            expire_at: now + self.lifetime,
        });
        ring.index.insert(key.to_owned(), end);
        ring.end = Ring::real(end + 1, self.cap);
        true
    }

    /// Removes `key` and every earlier (at least as old) entry. An empty
    /// `key` runs a plain expiry sweep from the oldest entry instead.
    pub fn remove(&self, key: &str) {
        if self.cap == 0 {
            return;
        }
        let mut ring = self.inner.lock();
        if key.is_empty() {
            ring.sweep_expired(Instant::now(), self.cap);
        } else if let Some(&slot) = ring.index.get(key) {
            let pos = ring.virtual_pos(slot, self.cap);
            ring.evict_through(pos, self.cap);
        }
    }

    /// Number of entries currently indexed, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const LIFETIME: Duration = Duration::from_millis(2);

    fn msg(id: u16) -> Message {
        let mut m = Message::new();
        m.set_id(id);
        m
    }

    #[test]
    fn fills_to_capacity_then_rejects() {
        let cache = MessageCache::new(3, Duration::from_secs(60));
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));
        assert!(cache.insert("c", msg(3)));
        assert!(!cache.insert("d", msg(4)));

        assert_eq!(cache.get("a").map(|m| m.id()), Some(1));
        assert_eq!(cache.get("b").map(|m| m.id()), Some(2));
        assert_eq!(cache.get("c").map(|m| m.id()), Some(3));
        assert!(cache.get("d").is_none());
    }

    #[test]
    fn expiry_sweep_makes_room() {
        let cache = MessageCache::new(3, LIFETIME);
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));
        assert!(cache.insert("c", msg(3)));

        sleep(LIFETIME + Duration::from_millis(1));
        cache.remove("");

        assert!(cache.insert("e", msg(5)));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("e").map(|m| m.id()), Some(5));
    }

    #[test]
    fn get_evicts_expired_entries() {
        let cache = MessageCache::new(3, LIFETIME);
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));

        sleep(LIFETIME + Duration::from_millis(1));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert!(cache.is_empty());

        // The ring is whole again after the evictions.
        assert!(cache.insert("c", msg(3)));
        assert!(cache.insert("d", msg(4)));
        assert!(cache.insert("e", msg(5)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn insert_reclaims_expired_ring_space() {
        let cache = MessageCache::new(2, LIFETIME);
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));

        sleep(LIFETIME + Duration::from_millis(1));
        // Full ring, but every entry is expired: insert sweeps first.
        assert!(cache.insert("c", msg(3)));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c").map(|m| m.id()), Some(3));
    }

    #[test]
    fn remove_evicts_key_and_older_entries() {
        let cache = MessageCache::new(3, Duration::from_secs(60));
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));
        assert!(cache.insert("c", msg(3)));

        cache.remove("b");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("c").map(|m| m.id()), Some(3));
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let cache = MessageCache::new(2, Duration::from_secs(60));
        assert!(cache.insert("a", msg(1)));
        cache.remove("nope");
        assert_eq!(cache.get("a").map(|m| m.id()), Some(1));
    }

    #[test]
    fn sweep_on_empty_cache_is_noop() {
        let cache = MessageCache::new(2, LIFETIME);
        cache.remove("");
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_never_stores() {
        let cache = MessageCache::new(0, Duration::from_secs(60));
        assert!(!cache.insert("a", msg(1)));
        assert!(cache.get("a").is_none());
        cache.remove("a");
        cache.remove("");
    }

    #[test]
    fn ring_wraps_around() {
        let cache = MessageCache::new(2, LIFETIME);
        assert!(cache.insert("a", msg(1)));
        assert!(cache.insert("b", msg(2)));

        sleep(LIFETIME + Duration::from_millis(1));
        // Everything expired; refill across the wrap point.
        assert!(cache.insert("c", msg(3)));
        assert!(cache.insert("d", msg(4)));
        assert!(!cache.insert("e", msg(5)));
        assert_eq!(cache.get("c").map(|m| m.id()), Some(3));
        assert_eq!(cache.get("d").map(|m| m.id()), Some(4));
    }
}
