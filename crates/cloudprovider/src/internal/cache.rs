//! Atomic snapshot cache.
//!
//! One poll cycle produces one immutable snapshot, published by pointer
//! swap. Readers clone the `Arc` and never contend with the per-account
//! mutex; `None` means "not yet polled".

use std::sync::{Arc, RwLock};

pub struct ResourcesCache<T> {
    snapshot: RwLock<Option<Arc<T>>>,
}

impl<T> Default for ResourcesCache<T> {
    fn default() -> Self {
        Self {
            snapshot: RwLock::new(None),
        }
    }
}

impl<T> ResourcesCache<T> {
    pub fn update_snapshot(&self, snapshot: Option<T>) {
        *self.snapshot.write().unwrap() = snapshot.map(Arc::new);
    }

    pub fn get_snapshot(&self) -> Option<Arc<T>> {
        self.snapshot.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_swaps_atomically_and_clears() {
        let cache: ResourcesCache<Vec<u32>> = ResourcesCache::default();
        assert!(cache.get_snapshot().is_none());

        cache.update_snapshot(Some(vec![1, 2, 3]));
        let held = cache.get_snapshot().unwrap();
        assert_eq!(*held, vec![1, 2, 3]);

        // A reader holding the old snapshot is unaffected by the swap.
        cache.update_snapshot(Some(vec![4]));
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(*cache.get_snapshot().unwrap(), vec![4]);

        cache.update_snapshot(None);
        assert!(cache.get_snapshot().is_none());
    }
}
