//! Registry of in-flight uploads
//!
//! Maps upload ids to their [`TransferHandle`]. Every read-modify-write runs
//! under one lock, so a `cancel` racing a terminal callback finalizes the id
//! exactly once.

use crate::transfer::TransferHandle;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Error returned by [`UploadRegistry::insert`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upload id {0:?} is already registered")]
pub struct Occupied(pub String);

#[derive(Debug, Default)]
pub struct UploadRegistry {
    entries: Mutex<HashMap<String, TransferHandle>>,
}

impl UploadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TransferHandle>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handle` under `id`.
    ///
    /// # Errors
    /// Returns [`Occupied`] if `id` already has a handle; the registry is unchanged.
    pub fn insert(&self, id: &str, handle: TransferHandle) -> Result<(), Occupied> {
        let mut entries = self.entries();
        if entries.contains_key(id) {
            return Err(Occupied(id.to_owned()));
        }
        entries.insert(id.to_owned(), handle);
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<TransferHandle> {
        self.entries().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Removes and returns the handle of `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<TransferHandle> {
        self.entries().remove(id)
    }

    /// Removes `id` only if it still maps to `handle`.
    ///
    /// Terminal callbacks use this so that a transfer never evicts a newer
    /// upload that reused its id.
    pub fn remove_if_current(&self, id: &str, handle: &TransferHandle) -> Option<TransferHandle> {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(current) if current == handle => entries.remove(id),
            _ => None,
        }
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> Vec<(String, TransferHandle)> {
        self.entries().drain().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Ids of all registered uploads, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[test]
    fn insert_lookup_remove() {
        let registry = UploadRegistry::new();
        let handle = TransferHandle::new();
        registry.insert("a", handle.clone()).unwrap();

        assert_eq!(registry.lookup("a"), Some(handle.clone()));
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove("a"), Some(handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn at_most_one_handle_per_id() {
        let registry = UploadRegistry::new();
        let first = TransferHandle::new();
        registry.insert("a", first.clone()).unwrap();

        let err = registry.insert("a", TransferHandle::new()).unwrap_err();
        assert_eq!(err, Occupied("a".into()));
        assert_eq!(registry.lookup("a"), Some(first));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = UploadRegistry::new();
        assert_eq!(registry.remove("missing"), None);

        registry.insert("a", TransferHandle::new()).unwrap();
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn remove_if_current_ignores_stale_handles() {
        let registry = UploadRegistry::new();
        let stale = TransferHandle::new();
        let fresh = TransferHandle::new();
        registry.insert("a", fresh.clone()).unwrap();

        assert_eq!(registry.remove_if_current("a", &stale), None);
        assert!(registry.contains("a"));
        assert_eq!(registry.remove_if_current("a", &fresh), Some(fresh));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn drain_and_ids() {
        let registry = UploadRegistry::new();
        registry.insert("a", TransferHandle::new()).unwrap();
        registry.insert("b", TransferHandle::new()).unwrap();

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_finalizers_remove_once() {
        for _ in 0..64 {
            let registry = Arc::new(UploadRegistry::new());
            let handle = TransferHandle::new();
            registry.insert("a", handle.clone()).unwrap();

            let canceller = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.remove("a").is_some())
            };
            let completer = {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.remove_if_current("a", &handle).is_some())
            };

            let cancelled = canceller.join().unwrap();
            let completed = completer.join().unwrap();
            assert!(cancelled ^ completed);
        }
    }
}
