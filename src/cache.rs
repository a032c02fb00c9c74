//! LRU cache of rendered artifacts, bounded by a byte quota and an entry
//! count cap.

use std::sync::Arc;

use lru::LruCache;

use crate::artifact::RasterArtifact;
use crate::key::{DocId, RenderKey};

struct CacheEntry {
    artifact: Arc<RasterArtifact>,
    size_bytes: u64,
}

/// Bounded artifact cache. The recency list is strict promote-on-access, so
/// eviction order is fully deterministic; entries are evicted from the LRU
/// end until both the byte budget and the entry cap hold.
pub struct RenderCache {
    // Unbounded so byte accounting sees every eviction; both caps are
    // enforced in `evict_to_budget`.
    entries: LruCache<RenderKey, CacheEntry>,
    max_entries: usize,
    max_bytes: u64,
    total_bytes: u64,
}

impl RenderCache {
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_entries: max_entries.max(1),
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Look up an artifact, promoting it to most-recently-used.
    #[must_use]
    pub fn get(&mut self, key: &RenderKey) -> Option<Arc<RasterArtifact>> {
        self.entries.get(key).map(|e| Arc::clone(&e.artifact))
    }

    /// Check presence without touching recency.
    #[must_use]
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.entries.contains(key)
    }

    /// Insert or replace, then evict until both budgets hold.
    pub fn insert(&mut self, key: RenderKey, artifact: Arc<RasterArtifact>) {
        let size_bytes = artifact.size_bytes();
        if let Some(prev) = self.entries.put(
            key,
            CacheEntry {
                artifact,
                size_bytes,
            },
        ) {
            self.total_bytes -= prev.size_bytes;
        }
        self.total_bytes += size_bytes;
        self.evict_to_budget();
    }

    fn evict_to_budget(&mut self) {
        while self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, entry)) => self.total_bytes -= entry.size_bytes,
                None => break,
            }
        }
    }

    /// Drop every entry not belonging to `doc_id`. Bounds memory to the
    /// active document on swap.
    pub fn purge_except(&mut self, doc_id: &DocId) {
        let stale: Vec<RenderKey> = self
            .entries
            .iter()
            .filter(|(k, _)| &k.doc != doc_id)
            .map(|(k, _)| k.clone())
            .collect();

        for key in stale {
            if let Some(entry) = self.entries.pop(&key) {
                self.total_bytes -= entry.size_bytes;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::artifact::PixelFormat;
    use crate::key::{ReadMode, Rotation};

    fn doc(name: &str) -> DocId {
        DocId::new(Path::new(name))
    }

    fn key(doc_id: &DocId, page: u32) -> RenderKey {
        RenderKey::new(
            doc_id.clone(),
            page,
            1.0,
            3,
            Rotation::R0,
            ReadMode::Default,
            None,
        )
    }

    fn artifact(bytes: usize) -> Arc<RasterArtifact> {
        Arc::new(RasterArtifact::packed(
            vec![0; bytes],
            (bytes / 3).max(1) as u32,
            1,
            PixelFormat::Rgb8,
        ))
    }

    #[test]
    fn insert_and_get() {
        let mut cache = RenderCache::new(8, u64::MAX);
        let d = doc("/a.pdf");
        cache.insert(key(&d, 0), artifact(300));

        assert!(cache.contains(&key(&d, 0)));
        assert!(cache.get(&key(&d, 0)).is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 300);
    }

    #[test]
    fn entry_cap_evicts_least_recently_used() {
        let mut cache = RenderCache::new(2, u64::MAX);
        let d = doc("/a.pdf");
        for page in 0..3 {
            cache.insert(key(&d, page), artifact(30));
        }

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(&d, 0)));
        assert!(cache.contains(&key(&d, 1)));
        assert!(cache.contains(&key(&d, 2)));
    }

    #[test]
    fn get_promotes_to_mru() {
        let mut cache = RenderCache::new(2, u64::MAX);
        let d = doc("/a.pdf");
        cache.insert(key(&d, 0), artifact(30));
        cache.insert(key(&d, 1), artifact(30));

        let _ = cache.get(&key(&d, 0));
        cache.insert(key(&d, 2), artifact(30));

        assert!(cache.contains(&key(&d, 0)));
        assert!(!cache.contains(&key(&d, 1)));
    }

    #[test]
    fn byte_budget_evicts_until_under_quota() {
        let mut cache = RenderCache::new(100, 1000);
        let d = doc("/a.pdf");
        cache.insert(key(&d, 0), artifact(600));
        cache.insert(key(&d, 1), artifact(600));

        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(&key(&d, 0)));
        assert!(cache.total_bytes() <= 1000);
    }

    #[test]
    fn replace_same_key_adjusts_accounting() {
        let mut cache = RenderCache::new(8, u64::MAX);
        let d = doc("/a.pdf");
        cache.insert(key(&d, 0), artifact(300));
        cache.insert(key(&d, 0), artifact(600));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 600);
    }

    #[test]
    fn oversized_artifact_does_not_linger() {
        let mut cache = RenderCache::new(8, 100);
        let d = doc("/a.pdf");
        cache.insert(key(&d, 0), artifact(600));

        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn purge_except_drops_foreign_documents() {
        let mut cache = RenderCache::new(8, u64::MAX);
        let a = doc("/a.pdf");
        let b = doc("/b.pdf");
        cache.insert(key(&a, 0), artifact(30));
        cache.insert(key(&a, 1), artifact(30));
        cache.insert(key(&b, 0), artifact(30));

        cache.purge_except(&b);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key(&b, 0)));
        assert_eq!(cache.total_bytes(), 30);
    }
}
