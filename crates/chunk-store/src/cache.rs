//! LRU cache for decoded chunks.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;

/// Cache key: (store, array, chunk index).
pub type ChunkKey = (String, String, u64);

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

/// LRU cache for decoded chunks with memory-bounded eviction.
pub struct ChunkCache {
    cache: LruCache<ChunkKey, Arc<Vec<f32>>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkCache {
    /// Create a new chunk cache with the given memory limit in bytes.
    pub fn new(memory_limit: usize) -> Self {
        // Entry bound is generous; memory is the real limit.
        let max_entries = NonZeroUsize::new((memory_limit / 4096).max(16)).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: LruCache::new(max_entries),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&mut self, key: &ChunkKey) -> Option<Arc<Vec<f32>>> {
        if let Some(data) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(data))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a chunk, evicting least recently used entries to make room.
    ///
    /// Chunks larger than the whole budget are not cached.
    pub fn insert(&mut self, key: ChunkKey, data: Arc<Vec<f32>>) {
        let data_size = data.len() * std::mem::size_of::<f32>();
        if data_size > self.memory_limit {
            return;
        }

        if let Some(previous) = self.cache.pop(&key) {
            self.current_memory = self
                .current_memory
                .saturating_sub(previous.len() * std::mem::size_of::<f32>());
        }

        while self.current_memory + data_size > self.memory_limit && !self.cache.is_empty() {
            self.pop_lru();
        }

        if let Some((_, evicted)) = self.cache.push(key, data) {
            // Entry-count bound reached.
            self.current_memory = self
                .current_memory
                .saturating_sub(evicted.len() * std::mem::size_of::<f32>());
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.current_memory += data_size;
    }

    /// Drop every cached chunk of one store.
    pub fn invalidate_store(&mut self, store: &str) {
        let keys: Vec<ChunkKey> = self
            .cache
            .iter()
            .filter(|(k, _)| k.0 == store)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            if let Some(data) = self.cache.pop(&key) {
                self.current_memory = self
                    .current_memory
                    .saturating_sub(data.len() * std::mem::size_of::<f32>());
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn pop_lru(&mut self) {
        if let Some((_, evicted)) = self.cache.pop_lru() {
            let evicted_size = evicted.len() * std::mem::size_of::<f32>();
            self.current_memory = self.current_memory.saturating_sub(evicted_size);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
