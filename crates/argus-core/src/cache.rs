//! In-memory cache of analysis results.
//!
//! Keys are SHA-256 digests of the language tag, the code and the catalog
//! fingerprint, so a catalog reload never serves stale results. Analysis is
//! deterministic; the cache only saves repeated work.

use std::sync::Arc;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use argus_analysis::AnalysisResult;

/// Bounded result cache shared by all analyses of one [`Analyzer`](crate::Analyzer).
#[derive(Clone)]
pub struct AnalysisCache {
    cache: Cache<String, Arc<AnalysisResult>>,
}

impl AnalysisCache {
    /// Creates a cache holding at most `max_entries` results.
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    /// Cache key for one analysis input.
    #[must_use]
    pub fn key(language: &str, code: &str, catalog_fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [language, code, catalog_fingerprint] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Looks up a result.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<AnalysisResult>> {
        self.cache.get(key)
    }

    /// Stores a result.
    pub fn insert(&self, key: String, result: Arc<AnalysisResult>) {
        self.cache.insert(key, result);
    }

    /// Number of entries currently in the cache. May lag behind recent
    /// inserts and invalidations.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate all entries.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_separate_every_part() {
        let a = AnalysisCache::key("python", "x = 1", "f1");
        assert_eq!(a, AnalysisCache::key("python", "x = 1", "f1"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, AnalysisCache::key("javascript", "x = 1", "f1"));
        assert_ne!(a, AnalysisCache::key("python", "x = 2", "f1"));
        assert_ne!(a, AnalysisCache::key("python", "x = 1", "f2"));
        assert_ne!(
            AnalysisCache::key("ab", "c", "f"),
            AnalysisCache::key("a", "bc", "f")
        );
    }

    #[test]
    fn insert_get_and_clear() {
        let cache = AnalysisCache::new(8);
        let key = AnalysisCache::key("python", "pass", "f");
        assert!(cache.get(&key).is_none());

        let result = Arc::new(AnalysisResult::empty("python"));
        cache.insert(key.clone(), Arc::clone(&result));
        assert_eq!(cache.get(&key).as_deref(), Some(&*result));

        cache.clear();
        assert!(cache.get(&key).is_none());
    }
}
