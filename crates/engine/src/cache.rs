//! Process-local card cache
//!
//! Two maps per bucket, `id → entry` and `slug → entry`. An entry is either
//! a stored card or a confirmed absence, so a repeated lookup of a missing
//! key never reaches the backing store.
//!
//! ## Exclusivity
//!
//! An id or slug resolves to at most one card across all buckets. `set`
//! therefore records the key as absent in every other bucket in the same
//! critical section that stores it.
//!
//! Entries never expire; only writes invalidate.
//!
//! ## Read fills
//!
//! A reader that missed fills the cache with what the backing store
//! returned, but that row may already be older than one a writer cached in
//! the meantime. Fills therefore only take vacant slots; a write's `set`
//! always replaces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use jellyfish_core::Bucket;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

/// A cached lookup result
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// The stored card
    Present(Value),
    /// Confirmed not to exist in this bucket
    Absent,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache (present or absent)
    pub hits: u64,
    /// Lookups that had to go to the backing store
    pub misses: u64,
}

#[derive(Debug, Default)]
struct BucketCache {
    by_id: HashMap<String, CacheEntry>,
    by_slug: HashMap<String, CacheEntry>,
}

fn key_of<'a>(element: &'a Value, field: &str) -> Option<&'a str> {
    element.get(field).and_then(Value::as_str)
}

fn put(map: &mut HashMap<String, CacheEntry>, key: &str, entry: CacheEntry, replace: bool) {
    if replace {
        map.insert(key.to_string(), entry);
    } else {
        map.entry(key.to_string()).or_insert(entry);
    }
}

/// Card cache shared by the query engine and the write path
#[derive(Debug)]
pub struct CardCache {
    enabled: bool,
    buckets: RwLock<HashMap<Bucket, BucketCache>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CardCache {
    /// Create an empty cache; a disabled cache stores nothing and always misses
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buckets: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether the cache is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store a written element under its id and slug, and mark both keys
    /// absent in every other bucket
    pub fn set(&self, bucket: Bucket, element: &Value) {
        self.store(bucket, element, true);
    }

    /// Like [`CardCache::set`] for a row read from the backing store: slots
    /// a write already holds are left alone
    pub fn fill(&self, bucket: Bucket, element: &Value) {
        self.store(bucket, element, false);
    }

    fn store(&self, bucket: Bucket, element: &Value, replace: bool) {
        if !self.enabled {
            return;
        }
        let id = key_of(element, "id");
        let slug = key_of(element, "slug");

        let mut buckets = self.buckets.write();
        for other in Bucket::ALL {
            let cache = buckets.entry(other).or_default();
            let entry = if other == bucket {
                CacheEntry::Present(element.clone())
            } else {
                CacheEntry::Absent
            };
            if let Some(id) = id {
                put(&mut cache.by_id, id, entry.clone(), replace);
            }
            if let Some(slug) = slug {
                put(&mut cache.by_slug, slug, entry, replace);
            }
        }
        trace!(target: "jellyfish::cache", %bucket, ?id, ?slug, replace, "Cached element");
    }

    /// Record that no element with this id exists in `bucket`, unless a
    /// write cached one since
    pub fn fill_missing_id(&self, bucket: Bucket, id: &str) {
        if self.enabled {
            let mut buckets = self.buckets.write();
            put(&mut buckets.entry(bucket).or_default().by_id, id, CacheEntry::Absent, false);
        }
    }

    /// Record that no element with this slug exists in `bucket`, unless a
    /// write cached one since
    pub fn fill_missing_slug(&self, bucket: Bucket, slug: &str) {
        if self.enabled {
            let mut buckets = self.buckets.write();
            put(&mut buckets.entry(bucket).or_default().by_slug, slug, CacheEntry::Absent, false);
        }
    }

    /// Look up by id; `None` is a cache miss
    pub fn get_by_id(&self, bucket: Bucket, id: &str) -> Option<CacheEntry> {
        self.get(bucket, |cache| cache.by_id.get(id))
    }

    /// Look up by slug; `None` is a cache miss
    pub fn get_by_slug(&self, bucket: Bucket, slug: &str) -> Option<CacheEntry> {
        self.get(bucket, |cache| cache.by_slug.get(slug))
    }

    fn get(
        &self,
        bucket: Bucket,
        find: impl Fn(&BucketCache) -> Option<&CacheEntry>,
    ) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        let found = self.buckets.read().get(&bucket).and_then(find).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Forget an element's id and slug in every bucket
    pub fn unset(&self, element: &Value) {
        let id = key_of(element, "id");
        let slug = key_of(element, "slug");
        let mut buckets = self.buckets.write();
        for cache in buckets.values_mut() {
            if let Some(id) = id {
                cache.by_id.remove(id);
            }
            if let Some(slug) = slug {
                cache.by_slug.remove(slug);
            }
        }
    }

    /// Drop every entry and zero the counters
    pub fn reset(&self) {
        self.buckets.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
