//! Store contract used by the duplicate resolver.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::Slot;

/// The two operations the resolver needs from a document store.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Every slot in the store. No pagination.
    async fn find_all(&self) -> Result<Vec<Slot>, StoreError>;

    /// Remove one slot by id. `NotFound` when nothing matched.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// In-process store keyed by id.
///
/// `find_all` returns slots in insertion order. Deletes of ids registered
/// with [`MemoryStore::fail_delete`] fail with `StoreError::Unavailable`,
/// and [`MemoryStore::fail_load`] makes `find_all` fail.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_seq: u64,
    slots: BTreeMap<u64, Slot>,
    failing_deletes: HashSet<String>,
    fail_load: bool,
    delete_calls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(slots: impl IntoIterator<Item = Slot>) -> Self {
        let store = Self::new();
        for slot in slots {
            store.insert(slot);
        }
        store
    }

    pub fn insert(&self, slot: Slot) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(seq, slot);
    }

    pub fn fail_delete(&self, id: &str) {
        self.lock().failing_deletes.insert(id.to_string());
    }

    pub fn fail_load(&self) {
        self.lock().fail_load = true;
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().slots.values().map(|s| s.id.clone()).collect()
    }

    /// Number of delete calls received, successful or not.
    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // a poisoned lock only means a test panicked mid-call; the data is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn find_all(&self) -> Result<Vec<Slot>, StoreError> {
        let inner = self.lock();
        if inner.fail_load {
            return Err(StoreError::Unavailable("find_all failed".to_string()));
        }
        Ok(inner.slots.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.delete_calls += 1;

        if inner.failing_deletes.contains(id) {
            return Err(StoreError::Unavailable(format!("delete of {} rejected", id)));
        }

        let seq = inner
            .slots
            .iter()
            .find(|(_, slot)| slot.id == id)
            .map(|(seq, _)| *seq)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        inner.slots.remove(&seq);
        Ok(())
    }
}
