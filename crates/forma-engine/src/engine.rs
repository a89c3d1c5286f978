//! The [`Engine`] handle and its collaborators.

use std::sync::Arc;

use forma_core::{
  collab::{AuditSink, FallbackLocalizer, Localizer},
  store::EntityStore,
};

use crate::{audit::TracingAudit, cache::TypeCache, config::EngineConfig, keyed::KeyedLocks};

/// Entry point for every definition, publish and persistence operation.
///
/// Operations live in [`crate::definitions`], [`crate::publisher`] and
/// [`crate::persistence`].
pub struct Engine<S> {
  pub(crate) store:     S,
  pub(crate) cache:     TypeCache,
  pub(crate) config:    EngineConfig,
  pub(crate) localizer: Arc<dyn Localizer>,
  pub(crate) audit:     Arc<dyn AuditSink>,
  /// Serializes saves and publishes per definition id.
  pub(crate) locks:     KeyedLocks,
}

impl<S: EntityStore> Engine<S> {
  pub fn new(store: S, config: EngineConfig) -> Self {
    let localizer = FallbackLocalizer {
      fallback_locale: config.default_locale.clone(),
    };
    Self {
      store,
      cache: TypeCache::new(),
      config,
      localizer: Arc::new(localizer),
      audit: Arc::new(TracingAudit),
      locks: KeyedLocks::default(),
    }
  }

  pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
    self.localizer = localizer;
    self
  }

  pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
    self.audit = audit;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn cache(&self) -> &TypeCache { &self.cache }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn localizer(&self) -> &dyn Localizer { self.localizer.as_ref() }
}
