//! In-process cache of compiled type descriptors.
//!
//! Reads go through `RwLock`ed maps and never wait on a compile. Misses are
//! single-flight per definition id: concurrent callers queue on a per-id
//! async mutex and the first one to get through builds the descriptor.
//!
//! Every id carries a generation counter. [`TypeCache::invalidate`] bumps it
//! without waiting for anything, so a compile that started before the
//! invalidation finishes with a stale generation and its result is handed to
//! its caller but not cached.
//!
//! A failed compile is shared the same way a successful one is: callers that
//! were already queued when it ran get its error instead of compiling again.
//! Callers arriving afterwards try again.

use std::{
  collections::HashMap,
  future::Future,
  sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU64, Ordering},
  },
};

use forma_core::compile::CompiledTypeDescriptor;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
  error::{Error, Result},
  keyed::KeyedLocks,
};

struct Slot {
  descriptor: Arc<CompiledTypeDescriptor>,
  generation: u64,
}

/// The outcome of the last flight for an id, when it failed.
struct Failure {
  flight:     u64,
  generation: u64,
  error:      Error,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits:     u64,
  pub misses:   u64,
  pub rebuilds: u64,
  pub failures: u64,
}

#[derive(Default)]
pub struct TypeCache {
  slots:       RwLock<HashMap<Uuid, Slot>>,
  generations: RwLock<HashMap<Uuid, u64>>,
  /// Lower-cased full type name → definition id, for cached types only.
  names:       RwLock<HashMap<String, Uuid>>,
  flights:     KeyedLocks,
  /// Completed flights per id.
  completed:   RwLock<HashMap<Uuid, u64>>,
  failed:      RwLock<HashMap<Uuid, Failure>>,
  hits:        AtomicU64,
  misses:      AtomicU64,
  rebuilds:    AtomicU64,
  failures:    AtomicU64,
}

impl std::fmt::Debug for TypeCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TypeCache")
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

impl TypeCache {
  pub fn new() -> Self { Self::default() }

  fn generation(&self, id: Uuid) -> u64 {
    self
      .generations
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .copied()
      .unwrap_or(0)
  }

  /// The cached descriptor, if it is current.
  pub fn get(&self, id: Uuid) -> Option<Arc<CompiledTypeDescriptor>> {
    let generation = self.generation(id);
    self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .filter(|s| s.generation == generation)
      .map(|s| s.descriptor.clone())
  }

  /// The most recent descriptor ever built for `id`, current or not.
  pub fn last_known(&self, id: Uuid) -> Option<Arc<CompiledTypeDescriptor>> {
    self
      .slots
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .map(|s| s.descriptor.clone())
  }

  /// Definition id for a cached, current full type name.
  pub fn resolve_name(&self, full_type_name: &str) -> Option<Uuid> {
    self
      .names
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&full_type_name.to_lowercase())
      .copied()
  }

  /// Mark the cached descriptor for `id` stale. Never blocks on a compile.
  pub fn invalidate(&self, id: Uuid) {
    *self
      .generations
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(id)
      .or_insert(0) += 1;
    self
      .names
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|_, v| *v != id);
    debug!(definition = %id, "descriptor invalidated");
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits:     self.hits.load(Ordering::Relaxed),
      misses:   self.misses.load(Ordering::Relaxed),
      rebuilds: self.rebuilds.load(Ordering::Relaxed),
      failures: self.failures.load(Ordering::Relaxed),
    }
  }

  fn completed(&self, id: Uuid) -> u64 {
    self
      .completed
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .copied()
      .unwrap_or(0)
  }

  /// Record a finished flight and return its number.
  fn complete(&self, id: Uuid) -> u64 {
    let mut completed = self.completed.write().unwrap_or_else(PoisonError::into_inner);
    let flight = completed.entry(id).or_insert(0);
    *flight += 1;
    *flight
  }

  /// The error of a flight that finished after `seen` for the current
  /// generation.
  fn shared_failure(&self, id: Uuid, seen: u64) -> Option<Error> {
    let generation = self.generation(id);
    self
      .failed
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .filter(|f| f.flight > seen && f.generation == generation)
      .map(|f| f.error.clone())
  }

  /// Return the current descriptor for `id`, running `build` on a miss.
  ///
  /// At most one `build` per id runs at a time; callers that queued behind
  /// it reuse its result, whether a descriptor or an error. A failed build
  /// leaves the previous descriptor in place for [`TypeCache::last_known`].
  pub async fn get_or_compile<F, Fut>(&self, id: Uuid, build: F) -> Result<Arc<CompiledTypeDescriptor>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CompiledTypeDescriptor>>,
  {
    if let Some(descriptor) = self.get(id) {
      self.hits.fetch_add(1, Ordering::Relaxed);
      return Ok(descriptor);
    }
    self.misses.fetch_add(1, Ordering::Relaxed);
    let seen = self.completed(id);

    let _flight = self.flights.lock(id).await;
    if let Some(descriptor) = self.get(id) {
      return Ok(descriptor);
    }
    if let Some(error) = self.shared_failure(id, seen) {
      return Err(error);
    }

    let generation = self.generation(id);
    let outcome = build().await;
    let flight = self.complete(id);
    let descriptor = match outcome {
      Ok(d) => Arc::new(d),
      Err(error) => {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self
          .failed
          .write()
          .unwrap_or_else(PoisonError::into_inner)
          .insert(id, Failure {
            flight,
            generation,
            error: error.clone(),
          });
        return Err(error);
      }
    };
    self.rebuilds.fetch_add(1, Ordering::Relaxed);
    self
      .failed
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);

    if self.generation(id) == generation {
      self
        .slots
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, Slot {
          descriptor: descriptor.clone(),
          generation,
        });
      self
        .names
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(descriptor.full_type_name.to_lowercase(), id);
      debug!(definition = %id, revision = descriptor.revision, "descriptor cached");
    } else {
      debug!(definition = %id, "descriptor invalidated while compiling; not cached");
    }
    Ok(descriptor)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap as Map,
    sync::atomic::AtomicUsize,
    time::Duration,
  };

  use forma_core::{compile::compile, definition::EntityDefinition, field::FieldMetadata};

  use super::*;

  fn descriptor(def: &EntityDefinition) -> CompiledTypeDescriptor {
    compile(def, &Map::new()).unwrap()
  }

  #[tokio::test]
  async fn hit_after_first_compile() {
    let cache = TypeCache::new();
    let def = EntityDefinition::new("Sales", "Product");
    let d = &def;

    let a = cache
      .get_or_compile(def.id, move || async move { Ok(descriptor(d)) })
      .await
      .unwrap();
    let b = cache
      .get_or_compile(def.id, || async { Err(Error::Cancelled) })
      .await
      .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.stats(), CacheStats {
      hits:     1,
      misses:   1,
      rebuilds: 1,
      failures: 0,
    });
    assert_eq!(cache.resolve_name("sales.PRODUCT"), Some(def.id));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_misses_build_once() {
    let cache = Arc::new(TypeCache::new());
    let def = Arc::new(EntityDefinition::new("Sales", "Product"));
    let builds = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
      .map(|_| {
        let (cache, def, builds) = (cache.clone(), def.clone(), builds.clone());
        tokio::spawn(async move {
          cache
            .get_or_compile(def.id, || {
              let (def, builds) = (def.clone(), builds.clone());
              async move {
                builds.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(descriptor(&def))
              }
            })
            .await
            .unwrap()
        })
      })
      .collect();
    for task in tasks {
      task.await.unwrap();
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().rebuilds, 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_failures_share_one_build() {
    let cache = Arc::new(TypeCache::new());
    let id = Uuid::new_v4();
    let builds = Arc::new(AtomicUsize::new(0));
    // Held until every caller has queued behind the first build.
    let gate = Arc::new(tokio::sync::RwLock::new(()));
    let held = gate.clone().write_owned().await;

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let (cache, builds, gate) = (cache.clone(), builds.clone(), gate.clone());
        tokio::spawn(async move {
          cache
            .get_or_compile(id, || async move {
              builds.fetch_add(1, Ordering::SeqCst);
              let _open = gate.read().await;
              Err(Error::TypeNotFound("Sales.Product".into()))
            })
            .await
        })
      })
      .collect();
    while cache.stats().misses < 8 {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    for task in tasks {
      assert!(matches!(task.await.unwrap(), Err(Error::TypeNotFound(_))));
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().failures, 1);

    // A caller arriving after the failure compiles again.
    let def = EntityDefinition::new("Sales", "Product");
    let d = &def;
    cache
      .get_or_compile(id, move || async move { Ok(descriptor(d)) })
      .await
      .unwrap();
    assert_eq!(cache.stats().rebuilds, 1);
  }

  #[tokio::test]
  async fn failure_keeps_previous_descriptor() {
    let cache = TypeCache::new();
    let def = EntityDefinition::new("Sales", "Product").with_field(FieldMetadata::string("Code", 64));
    let d = &def;
    let first = cache
      .get_or_compile(def.id, move || async move { Ok(descriptor(d)) })
      .await
      .unwrap();

    cache.invalidate(def.id);
    assert!(cache.get(def.id).is_none());
    assert_eq!(cache.resolve_name("Sales.Product"), None);

    let err = cache
      .get_or_compile(def.id, || async { Err(Error::TypeNotFound("bad rules".into())) })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::TypeNotFound(ref m) if m == "bad rules"));
    assert!(Arc::ptr_eq(&cache.last_known(def.id).unwrap(), &first));
    assert_eq!(cache.stats().failures, 1);
  }

  #[tokio::test]
  async fn invalidation_during_compile_is_not_cached() {
    let cache = TypeCache::new();
    let def = EntityDefinition::new("Sales", "Product");
    let (c, d) = (&cache, &def);
    let stale = cache
      .get_or_compile(def.id, move || async move {
        c.invalidate(d.id);
        Ok(descriptor(d))
      })
      .await
      .unwrap();
    assert_eq!(stale.definition_id, def.id);
    assert!(cache.get(def.id).is_none());
  }
}
