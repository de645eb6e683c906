use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::subscription::{SubscriptionOptions, SubscriptionShared};

#[derive(Clone)]
struct RegistryEntry {
    sub: Arc<SubscriptionShared>,
    seq: u64,
}

/// Live subscriptions of one bus instance.
///
/// Read by the metadata service and by overlap detection when a new
/// subscription is added. Registration order is kept so snapshots are stable.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<u64, RegistryEntry>,
    seq: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    pub(crate) fn insert(&self, sub: Arc<SubscriptionShared>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(sub.id(), RegistryEntry { sub, seq });
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Registered subscriptions in registration order, copied out so the
    /// registry may change while the caller iterates.
    pub(crate) fn snapshot(&self) -> Vec<Arc<SubscriptionShared>> {
        let mut entries: Vec<RegistryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.sub).collect()
    }

    /// Options of every registered subscription, in registration order.
    pub fn exposing(&self) -> Vec<SubscriptionOptions> {
        self.snapshot().iter().map(|s| s.options()).collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.snapshot().iter().map(|s| s.subject().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
