//! Last-observed etag per key

use dashmap::DashMap;

/// Process-local map of key to the etag last seen for it.
///
/// Entries are never evicted and never invalidated by changes made elsewhere,
/// so a cached etag may be stale. It only feeds delete preconditions.
#[derive(Debug, Default)]
pub struct VersionCache {
    etags: DashMap<String, String>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self {
            etags: DashMap::new(),
        }
    }

    pub fn record(&self, key: &str, etag: &str) {
        self.etags.insert(key.to_string(), etag.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.etags.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.etags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.etags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_overwrites() {
        let cache = VersionCache::new();
        assert!(cache.get("site.crt").is_none());

        cache.record("site.crt", "\"1\"");
        cache.record("site.crt", "\"2\"");

        assert_eq!(cache.get("site.crt").as_deref(), Some("\"2\""));
        assert_eq!(cache.len(), 1);
    }
}
