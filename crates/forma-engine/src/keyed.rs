//! Per-key async mutexes.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per definition id. Different ids never contend.
#[derive(Debug, Default)]
pub struct KeyedLocks {
  slots: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
  pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      // Idle entries are dropped here so the map stays bounded by the
      // number of keys currently in use.
      slots.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
      slots.entry(key).or_default().clone()
    };
    slot.lock_owned().await
  }
}
