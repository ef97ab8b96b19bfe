use super::Recommendation;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Fingerprint-keyed recommendation cache with LRU and TTL eviction.
///
/// Recency is a doubly linked list threaded through a slot vector, so both
/// touch and eviction are O(1). `head` is least recently used, `tail` most.
pub struct AdvisoryCache {
    inner: RwLock<Lru>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Node {
    key: String,
    value: Recommendation,
    created: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Lru {
    map: HashMap<String, usize>,
    /// Freed slots stay allocated and are reused by the next insert.
    slots: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Lru {
    fn node(&self, idx: usize) -> &Node {
        &self.slots[idx]
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.slots[idx]
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(idx);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.node_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        let key = std::mem::take(&mut self.slots[idx].key);
        self.map.remove(&key);
        self.free.push(idx);
    }

    fn insert(&mut self, key: String, value: Recommendation, created: Instant) {
        let node = Node {
            key: key.clone(),
            value,
            created,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = node;
                idx
            }
            None => {
                self.slots.push(node);
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_back(idx);
    }
}

impl AdvisoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Lru::default()),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Hit returns a copy flagged `from_cache`; expired entries are removed.
    pub fn get(&self, fingerprint: &str) -> Option<Recommendation> {
        self.get_at(fingerprint, Instant::now())
    }

    pub fn get_at(&self, fingerprint: &str, now: Instant) -> Option<Recommendation> {
        let mut lru = self.inner.write();
        let Some(&idx) = lru.map.get(fingerprint) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if now.saturating_duration_since(lru.node(idx).created) > self.ttl {
            lru.remove(idx);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        lru.unlink(idx);
        lru.push_back(idx);
        self.hits.fetch_add(1, Ordering::Relaxed);

        let mut hit = lru.node(idx).value.clone();
        hit.from_cache = true;
        Some(hit)
    }

    pub fn put(&self, fingerprint: impl Into<String>, recommendation: Recommendation) {
        self.put_at(fingerprint, recommendation, Instant::now())
    }

    pub fn put_at(&self, fingerprint: impl Into<String>, recommendation: Recommendation, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let key = fingerprint.into();
        let mut lru = self.inner.write();

        if let Some(&idx) = lru.map.get(&key) {
            {
                let node = lru.node_mut(idx);
                node.value = recommendation;
                node.created = now;
            }
            lru.unlink(idx);
            lru.push_back(idx);
            return;
        }

        while lru.map.len() >= self.capacity {
            match lru.head {
                Some(oldest) => lru.remove(oldest),
                None => break,
            }
        }
        lru.insert(key, recommendation, now);
    }

    pub fn size(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn clear(&self) {
        *self.inner.write() = Lru::default();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.size(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
