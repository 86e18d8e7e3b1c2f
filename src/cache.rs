//! Bounded FIFO cache of sampled pixel buffers.
//!
//! The cache has a single writer: the execution context driving playback.
//! It holds no lock of its own; callers that share it across threads must
//! wrap it themselves.

use std::collections::{HashMap, VecDeque};

use crate::source::PixelBuffer;

pub const DEFAULT_CAPACITY: usize = 10;

/// `(timestamp rounded to 0.01s, output width, output height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    centis: i64,
    width: u32,
    height: u32,
}

impl CacheKey {
    pub fn new(time: f64, width: u32, height: u32) -> Self {
        Self {
            centis: (time * 100.0).round() as i64,
            width,
            height,
        }
    }

    /// Timestamp in seconds after rounding.
    pub fn time(&self) -> f64 {
        self.centis as f64 / 100.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Strict insertion-order eviction; hits do not refresh an entry's position.
#[derive(Debug)]
pub struct FrameCache {
    capacity: usize,
    entries: HashMap<CacheKey, PixelBuffer>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<PixelBuffer> {
        match self.entries.get(key) {
            Some(buffer) => {
                self.hits += 1;
                Some(buffer.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert `buffer`, evicting the oldest entry if full.
    ///
    /// Re-inserting an existing key moves it to the back of the queue.
    pub fn put(&mut self, key: CacheKey, buffer: PixelBuffer) {
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key);
        self.entries.insert(key, buffer);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `(hits, misses)` since creation or the last clear.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(v: u8) -> PixelBuffer {
        PixelBuffer::solid(2, 2, [v, v, v, 255])
    }

    #[test]
    fn test_key_rounding() {
        assert_eq!(CacheKey::new(1.234, 80, 30), CacheKey::new(1.2349, 80, 30));
        assert_ne!(CacheKey::new(1.23, 80, 30), CacheKey::new(1.24, 80, 30));
        assert_ne!(CacheKey::new(1.0, 80, 30), CacheKey::new(1.0, 81, 30));
        assert_eq!(CacheKey::new(2.006, 1, 1).time(), 2.01);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut cache = FrameCache::new(3);
        for i in 0..4u8 {
            cache.put(CacheKey::new(f64::from(i), 10, 4), buf(i));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&CacheKey::new(0.0, 10, 4)));
        assert!(cache.contains(&CacheKey::new(3.0, 10, 4)));
    }

    #[test]
    fn test_hit_does_not_refresh_position() {
        let mut cache = FrameCache::new(2);
        let a = CacheKey::new(0.0, 10, 4);
        let b = CacheKey::new(1.0, 10, 4);
        cache.put(a, buf(1));
        cache.put(b, buf(2));
        assert!(cache.get(&a).is_some());
        cache.put(CacheKey::new(2.0, 10, 4), buf(3));
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
    }

    #[test]
    fn test_reinsert_moves_to_back() {
        let mut cache = FrameCache::new(2);
        let a = CacheKey::new(0.0, 10, 4);
        let b = CacheKey::new(1.0, 10, 4);
        cache.put(a, buf(1));
        cache.put(b, buf(2));
        cache.put(a, buf(9));
        assert_eq!(cache.len(), 2);
        cache.put(CacheKey::new(2.0, 10, 4), buf(3));
        assert!(!cache.contains(&b));
        assert_eq!(cache.get(&a), Some(buf(9)));
    }

    #[test]
    fn test_stats_and_clear() {
        let mut cache = FrameCache::default();
        let key = CacheKey::new(0.5, 10, 4);
        assert!(cache.get(&key).is_none());
        cache.put(key, buf(1));
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.stats(), (1, 1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), (0, 0));
    }
}
