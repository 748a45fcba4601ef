//! Per-record resolution cache.
//!
//! Maps every specifier a module requests to the dependency chosen for it.
//! The key set is fixed when the cache is seeded; only values change.

/// Ordered specifier → dependency mapping.
///
/// `None` is the unresolved sentinel.
#[derive(Debug, Clone)]
pub struct ResolveCache<T> {
    entries: Vec<(String, Option<T>)>,
}

impl<T> ResolveCache<T> {
    /// Seed the cache with an unresolved entry per specifier.
    ///
    /// Order is preserved; repeated specifiers keep their first position.
    pub fn seeded(specifiers: impl IntoIterator<Item = String>) -> Self {
        let mut entries: Vec<(String, Option<T>)> = Vec::new();
        for specifier in specifiers {
            if !entries.iter().any(|(key, _)| *key == specifier) {
                entries.push((specifier, None));
            }
        }
        Self { entries }
    }

    /// Returns `true` if `specifier` is a key.
    pub fn contains(&self, specifier: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == specifier)
    }

    /// The dependency resolved for `specifier`, if any.
    pub fn get(&self, specifier: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(key, _)| key == specifier)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Set the dependency for an existing key.
    ///
    /// Returns the previous value, or gives `target` back if the key is
    /// unknown.
    pub fn resolve(&mut self, specifier: &str, target: T) -> Result<Option<T>, T> {
        match self.entries.iter_mut().find(|(key, _)| key == specifier) {
            Some((_, value)) => Ok(value.replace(target)),
            None => Err(target),
        }
    }

    /// Keys in seeding order.
    pub fn specifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Specifiers still holding the unresolved sentinel.
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.as_str())
    }

    /// Entries in seeding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&T>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for ResolveCache<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(specifiers: &[&str]) -> ResolveCache<u32> {
        ResolveCache::seeded(specifiers.iter().map(ToString::to_string))
    }

    #[test]
    fn test_seeded_keys_preserve_order() {
        let cache = seeded(&["b", "a", "c"]);

        assert_eq!(cache.specifiers().collect::<Vec<_>>(), ["b", "a", "c"]);
        assert_eq!(cache.unresolved().count(), 3);
    }

    #[test]
    fn test_duplicate_specifiers_collapse() {
        let cache = seeded(&["a", "b", "a"]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.specifiers().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_resolve_last_write_wins() {
        let mut cache = seeded(&["a"]);

        assert_eq!(cache.resolve("a", 1), Ok(None));
        assert_eq!(cache.resolve("a", 2), Ok(Some(1)));
        assert_eq!(cache.get("a"), Some(&2));
        assert_eq!(cache.unresolved().count(), 0);
    }

    #[test]
    fn test_resolve_unknown_key_leaves_cache_unchanged() {
        let mut cache = seeded(&["a"]);

        assert_eq!(cache.resolve("c", 9), Err(9));
        assert!(!cache.contains("c"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_iter_reports_sentinels() {
        let mut cache = seeded(&["a", "b"]);
        cache.resolve("b", 5).unwrap();

        let entries: Vec<_> = cache.iter().collect();
        assert_eq!(entries, [("a", None), ("b", Some(&5))]);
    }

    #[test]
    fn test_empty_cache() {
        let cache: ResolveCache<u32> = ResolveCache::default();
        assert!(cache.is_empty());
        assert!(!cache.contains("a"));
    }
}
