//! Metadata document cache.
//!
//! Stat and list calls re-read `file.json` for every key they touch,
//! which costs a full disk fan-out per object. The engine instead keeps
//! recently used documents in memory, metered by the serialized bytes
//! each occupies on disk and bounded by a configurable cap. Objects are
//! immutable, so a cached document stays correct until its key is
//! overwritten or deleted; the write and delete paths call
//! [`MetaCache::invalidate`] at exactly those points.
//!
//! Eviction is oldest-access-first: every hit refreshes an access
//! stamp, and when an insert needs room the entry with the stalest
//! stamp is dropped. The map stays small (documents are a few KiB
//! against a multi-MiB cap), so a linear scan for the stalest entry is
//! cheaper than maintaining a separate recency list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reef_types::ObjectMeta;
use tracing::trace;

struct CachedDoc {
    meta: Arc<ObjectMeta>,
    /// Serialized length of the document, counted against the cap.
    size: u64,
    /// Logical time of the last hit or insert.
    stamp: u64,
}

struct CacheState {
    docs: HashMap<String, CachedDoc>,
    used_bytes: u64,
    clock: u64,
}

impl CacheState {
    /// Drop the least recently touched document. Returns `false` once
    /// the cache is empty.
    fn drop_stalest(&mut self) -> bool {
        let stalest = self
            .docs
            .iter()
            .min_by_key(|(_, doc)| doc.stamp)
            .map(|(key, _)| key.clone());
        let Some(key) = stalest else {
            return false;
        };
        if let Some(doc) = self.docs.remove(&key) {
            self.used_bytes -= doc.size;
            trace!(key = %key, freed = doc.size, "dropped stale metadata document");
        }
        true
    }
}

/// Byte-capped cache of parsed `file.json` documents, keyed by
/// `bucket/key`. Shared across tasks behind one mutex; every operation
/// is pure map work.
pub(crate) struct MetaCache {
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl MetaCache {
    /// A cache admitting at most `max_bytes` of serialized documents.
    /// A cap of zero disables caching.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState {
                docs: HashMap::new(),
                used_bytes: 0,
                clock: 0,
            }),
        }
    }

    /// Record a freshly loaded document of serialized length `size`,
    /// making room by dropping stale entries. A document that could
    /// never fit is not admitted.
    pub fn put(&self, key: String, meta: Arc<ObjectMeta>, size: u64) {
        if size > self.max_bytes {
            return;
        }
        let mut state = self.state.lock().expect("meta cache poisoned");
        if let Some(prev) = state.docs.remove(&key) {
            state.used_bytes -= prev.size;
        }
        while state.used_bytes + size > self.max_bytes {
            if !state.drop_stalest() {
                break;
            }
        }
        state.clock += 1;
        state.used_bytes += size;
        let stamp = state.clock;
        state.docs.insert(key, CachedDoc { meta, size, stamp });
    }

    /// Fetch a document, refreshing its access stamp.
    pub fn get(&self, key: &str) -> Option<Arc<ObjectMeta>> {
        let mut state = self.state.lock().expect("meta cache poisoned");
        state.clock += 1;
        let now = state.clock;
        let doc = state.docs.get_mut(key)?;
        doc.stamp = now;
        Some(doc.meta.clone())
    }

    /// Forget a key. Called when its object is overwritten or deleted.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.state.lock().expect("meta cache poisoned");
        if let Some(doc) = state.docs.remove(key) {
            state.used_bytes -= doc.size;
        }
    }

    #[cfg(test)]
    fn used_bytes(&self) -> u64 {
        self.state.lock().expect("meta cache poisoned").used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reef_types::checksum::HashAlgorithm;
    use reef_types::{ErasureInfo, ObjectStat, META_VERSION};

    /// A document tagged through its size field so tests can tell
    /// cached copies apart.
    fn doc(tag: u64) -> Arc<ObjectMeta> {
        Arc::new(ObjectMeta {
            version: META_VERSION,
            stat: ObjectStat {
                size: tag,
                mod_time: Utc::now(),
            },
            erasure: ErasureInfo {
                data_blocks: 3,
                parity_blocks: 3,
                block_size: 1024,
                distribution: vec![1, 2, 3, 4, 5, 6],
                algorithm: HashAlgorithm::Blake3,
                checksum: Vec::new(),
            },
            meta: Default::default(),
        })
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = MetaCache::new(1024);
        assert!(cache.get("b/k").is_none());
        cache.put("b/k".into(), doc(7), 64);
        assert_eq!(cache.get("b/k").unwrap().stat.size, 7);
    }

    #[test]
    fn test_stalest_entry_evicted_first() {
        let cache = MetaCache::new(300);
        cache.put("one".into(), doc(1), 100);
        cache.put("two".into(), doc(2), 100);
        cache.put("three".into(), doc(3), 100);

        // Touch "one" so "two" becomes the stalest entry.
        let _ = cache.get("one");
        cache.put("four".into(), doc(4), 100);

        assert!(cache.get("one").is_some());
        assert!(cache.get("two").is_none());
        assert!(cache.get("three").is_some());
        assert!(cache.get("four").is_some());
    }

    #[test]
    fn test_cap_never_exceeded() {
        let cache = MetaCache::new(250);
        for i in 0..10u64 {
            cache.put(format!("key-{i}"), doc(i), 100);
            assert!(cache.used_bytes() <= 250, "cap breached at insert {i}");
        }
        // Only two 100-byte documents fit under a 250-byte cap.
        assert_eq!(cache.used_bytes(), 200);
    }

    #[test]
    fn test_insert_can_displace_several_entries() {
        let cache = MetaCache::new(300);
        cache.put("a".into(), doc(1), 100);
        cache.put("b".into(), doc(2), 100);
        cache.put("c".into(), doc(3), 100);
        // A 250-byte document needs all but one slot cleared.
        cache.put("big".into(), doc(4), 250);
        assert!(cache.get("big").is_some());
        assert_eq!(cache.used_bytes(), 250);
    }

    #[test]
    fn test_invalidate_frees_bytes() {
        let cache = MetaCache::new(1024);
        cache.put("b/k".into(), doc(1), 400);
        cache.invalidate("b/k");
        assert!(cache.get("b/k").is_none());
        assert_eq!(cache.used_bytes(), 0);
        // Invalidating a missing key is harmless.
        cache.invalidate("b/k");
    }

    #[test]
    fn test_reinsert_replaces_and_reaccounts() {
        let cache = MetaCache::new(1024);
        cache.put("b/k".into(), doc(1), 600);
        cache.put("b/k".into(), doc(2), 200);
        assert_eq!(cache.get("b/k").unwrap().stat.size, 2);
        assert_eq!(cache.used_bytes(), 200);
    }

    #[test]
    fn test_document_larger_than_cap_not_admitted() {
        let cache = MetaCache::new(100);
        cache.put("huge".into(), doc(1), 101);
        assert!(cache.get("huge").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_zero_cap_disables_caching() {
        let cache = MetaCache::new(0);
        cache.put("b/k".into(), doc(1), 1);
        assert!(cache.get("b/k").is_none());
    }
}
