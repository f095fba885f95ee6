//! Read-through LRU cache over any blob store.
//!
//! Content is immutable once stored, so a cached fetch can never go stale.
//! Pushes and existence checks pass straight through.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{BlobStore, StoreError, Tagger};
use crate::types::{Descriptor, Digest};

/// Configuration for the fetch cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            enabled: true,
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches served from the cache.
    pub hits: u64,
    /// Fetches that went to the inner store.
    pub misses: u64,
}

/// Blob store wrapper caching fetched bytes by digest.
pub struct CachedBlobStore<S: BlobStore> {
    inner: S,
    cache: Option<Mutex<LruCache<Digest, Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: BlobStore> CachedBlobStore<S> {
    /// Wrap `inner` with a cache sized by `config`.
    pub fn new(inner: S, config: CacheConfig) -> Self {
        let cache = if config.enabled {
            NonZeroUsize::new(config.max_entries).map(|size| Mutex::new(LruCache::new(size)))
        } else {
            None
        };
        Self {
            inner,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<S: BlobStore> BlobStore for CachedBlobStore<S> {
    fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<(), StoreError> {
        self.inner.push(descriptor, data)
    }

    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, StoreError> {
        let Some(cache) = &self.cache else {
            return self.inner.fetch(descriptor);
        };

        if let Some(data) = cache.lock().get(&descriptor.digest) {
            // The digest matched on insert; the size still has to match this descriptor.
            if data.len() as u64 != descriptor.size {
                return Err(StoreError::SizeMismatch {
                    digest: descriptor.digest.clone(),
                    expected: descriptor.size,
                    actual: data.len() as u64,
                });
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let data = self.inner.fetch(descriptor)?;
        cache.lock().put(descriptor.digest.clone(), data.clone());
        Ok(data)
    }

    fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        if let Some(cache) = &self.cache {
            if cache.lock().contains(&descriptor.digest) {
                return Ok(true);
            }
        }
        self.inner.exists(descriptor)
    }
}

impl<S: BlobStore + Tagger> Tagger for CachedBlobStore<S> {
    fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<(), StoreError> {
        self.inner.tag(descriptor, reference)
    }

    fn resolve(&self, reference: &str) -> Result<Descriptor, StoreError> {
        self.inner.resolve(reference)
    }
}
