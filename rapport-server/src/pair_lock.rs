use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// One mutex per key, created on first use and dropped with its last holder.
/// The map itself is only locked for the lookup, never while a key is held.
#[derive(Default)]
pub struct PairLocks {
    slots: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

pub struct PairGuard<'a> {
    locks: &'a PairLocks,
    key: Vec<u8>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl PairLocks {
    pub fn lock(&self, key: &[u8]) -> PairGuard<'_> {
        let slot = self.slots.lock().entry(key.to_vec()).or_default().clone();
        PairGuard {
            locks: self,
            key: key.to_vec(),
            guard: Some(slot.lock_arc()),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.locks.slots.lock();
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}
