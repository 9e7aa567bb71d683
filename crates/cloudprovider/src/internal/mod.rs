//! Common plugin framework shared by the cloud plugins: the per-account
//! registry, snapshot cache, poll stats, and the inventory poller.

pub mod cache;
pub mod poller;
pub mod stats;

pub use self::cache::ResourcesCache;
pub use self::poller::{spawn_poller, PollerHandle};
pub use self::stats::{wait_for_inventory_init, InventoryStats};

use crate::types::NamespacedName;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Sentinel recorded in credential fields when secret resolution fails, so
/// later operations fail cleanly instead of using stale values.
pub const ACCOUNT_CREDENTIALS_DEFAULT: &str = "default";

/// Bounded wait applied when a caller blocks on inventory initialization.
pub const INVENTORY_INIT_WAIT_DURATION: Duration = Duration::from_secs(30);

/// Account-key → per-account entry map with reader-writer semantics.
pub struct AccountRegistry<E> {
    entries: RwLock<HashMap<NamespacedName, Arc<E>>>,
}

impl<E> Default for AccountRegistry<E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> AccountRegistry<E> {
    pub fn get(&self, key: &NamespacedName) -> Option<Arc<E>> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: NamespacedName, entry: Arc<E>) {
        self.entries.write().unwrap().insert(key, entry);
    }

    pub fn remove(&self, key: &NamespacedName) -> Option<Arc<E>> {
        self.entries.write().unwrap().remove(key)
    }

    pub fn keys(&self) -> Vec<NamespacedName> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<E>> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}
