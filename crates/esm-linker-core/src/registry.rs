//! Identity index from engine modules to wrapper records.
//!
//! Engine identity hashes are not unique, so each hash maps to a small bucket
//! and lookups confirm the match by handle identity. Entries hold weak
//! references: the registry never keeps a record alive.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// One registered module.
struct RegistryEntry<M, T> {
    module: M,
    record: Weak<T>,
}

/// Context-scoped registry of live module records.
///
/// `M` is the engine's module handle and `T` the record it indexes. Callers
/// pass the engine's identity comparison to every operation that matches
/// handles.
pub struct ModuleRegistry<M, T> {
    buckets: HashMap<u32, Vec<RegistryEntry<M, T>>>,
}

impl<M, T> ModuleRegistry<M, T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Insert a record under `hash`.
    ///
    /// Entries whose records are already gone are pruned from the bucket.
    pub fn register(&mut self, hash: u32, module: M, record: Weak<T>) {
        let bucket = self.buckets.entry(hash).or_default();
        bucket.retain(|entry| entry.record.strong_count() > 0);
        bucket.push(RegistryEntry { module, record });
    }

    /// Find the live record for `module`.
    pub fn lookup(&self, hash: u32, module: &M, same: impl Fn(&M, &M) -> bool) -> Option<Rc<T>> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|entry| same(&entry.module, module))
            .and_then(|entry| entry.record.upgrade())
    }

    /// Remove the entry for `module`. Returns `true` if one was removed.
    pub fn unregister(&mut self, hash: u32, module: &M, same: impl Fn(&M, &M) -> bool) -> bool {
        let Some(bucket) = self.buckets.get_mut(&hash) else {
            return false;
        };

        let Some(index) = bucket.iter().position(|entry| same(&entry.module, module)) else {
            return false;
        };
        bucket.swap_remove(index);

        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        true
    }

    /// Number of registered records that are still alive.
    pub fn len(&self) -> usize {
        self.buckets
            .values()
            .flatten()
            .filter(|entry| entry.record.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live record is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries sharing `hash`, live or not.
    pub fn bucket_len(&self, hash: u32) -> usize {
        self.buckets.get(&hash).map_or(0, Vec::len)
    }
}

impl<M, T> Default for ModuleRegistry<M, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, T> std::fmt::Debug for ModuleRegistry<M, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("buckets", &self.buckets.len())
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Handles are boxed ids compared by address, like engine handles
    type Handle = Rc<u32>;

    fn same(a: &Handle, b: &Handle) -> bool {
        Rc::ptr_eq(a, b)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry: ModuleRegistry<Handle, &'static str> = ModuleRegistry::new();
        let handle = Rc::new(1);
        let record = Rc::new("a.mod");

        registry.register(7, handle.clone(), Rc::downgrade(&record));

        let found = registry.lookup(7, &handle, same).unwrap();
        assert!(Rc::ptr_eq(&found, &record));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_colliding_hashes_are_disambiguated() {
        let mut registry: ModuleRegistry<Handle, &'static str> = ModuleRegistry::new();
        let first = Rc::new(1);
        let second = Rc::new(1);
        let first_record = Rc::new("first");
        let second_record = Rc::new("second");

        registry.register(0, first.clone(), Rc::downgrade(&first_record));
        registry.register(0, second.clone(), Rc::downgrade(&second_record));

        assert_eq!(registry.bucket_len(0), 2);
        assert_eq!(*registry.lookup(0, &first, same).unwrap(), "first");
        assert_eq!(*registry.lookup(0, &second, same).unwrap(), "second");
    }

    #[test]
    fn test_lookup_unknown_handle() {
        let mut registry: ModuleRegistry<Handle, &'static str> = ModuleRegistry::new();
        let record = Rc::new("a");
        registry.register(3, Rc::new(1), Rc::downgrade(&record));

        assert!(registry.lookup(3, &Rc::new(1), same).is_none());
        assert!(registry.lookup(4, &Rc::new(1), same).is_none());
    }

    #[test]
    fn test_unregister_removes_only_matching_entry() {
        let mut registry: ModuleRegistry<Handle, &'static str> = ModuleRegistry::new();
        let first = Rc::new(1);
        let second = Rc::new(2);
        let first_record = Rc::new("first");
        let second_record = Rc::new("second");
        registry.register(0, first.clone(), Rc::downgrade(&first_record));
        registry.register(0, second.clone(), Rc::downgrade(&second_record));

        assert!(registry.unregister(0, &first, same));
        assert!(!registry.unregister(0, &first, same));

        assert!(registry.lookup(0, &first, same).is_none());
        assert_eq!(*registry.lookup(0, &second, same).unwrap(), "second");

        assert!(registry.unregister(0, &second, same));
        assert_eq!(registry.bucket_len(0), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dead_records_are_not_returned() {
        let mut registry: ModuleRegistry<Handle, &'static str> = ModuleRegistry::new();
        let handle = Rc::new(1);
        let record = Rc::new("gone");
        registry.register(1, handle.clone(), Rc::downgrade(&record));
        drop(record);

        assert!(registry.lookup(1, &handle, same).is_none());
        assert_eq!(registry.len(), 0);

        // Registering again prunes the stale entry
        let replacement = Rc::new("new");
        registry.register(1, Rc::new(2), Rc::downgrade(&replacement));
        assert_eq!(registry.bucket_len(1), 1);
    }
}
