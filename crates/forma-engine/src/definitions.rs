//! Definition lifecycle: validate, save, load and compile.
//!
//! Saving normalizes the candidate before validating it. The engine owns
//! the primary key field, interface fields, lifecycle status, lock flags and
//! published revisions; whatever the caller sent for those is replaced.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use forma_core::{
  compile::{CompiledTypeDescriptor, PRIMARY_KEY, ReferenceTarget, compile},
  definition::{DefinitionStatus, EntityDefinition, default_route},
  field::{FieldMetadata, FieldSource, FieldType},
  schema::{AppliedSchema, analyze_changes},
  store::EntityStore,
  validate::{KnownDefinition, ValidationContext, ValidationResult, validate_definition},
};
use tracing::info;
use uuid::Uuid;

use crate::{
  engine::Engine,
  error::{Error, Result},
};

impl<S: EntityStore> Engine<S> {
  // ─── Validation ────────────────────────────────────────────────────────────

  /// Validate `candidate` as [`Engine::save_definition`] would, without
  /// saving anything.
  pub async fn validate_definition(&self, candidate: &EntityDefinition) -> Result<ValidationResult> {
    let all = self.all_definitions().await?;
    let existing = all.iter().find(|d| d.id == candidate.id);
    let mut candidate = candidate.clone();
    prepare(&mut candidate, existing);
    Ok(check(&candidate, existing, &all))
  }

  // ─── Save ──────────────────────────────────────────────────────────────────

  /// Create or update a definition.
  ///
  /// New definitions start as `Draft`. Saving a published definition moves
  /// it to `Modified` when its schema differs from what was last applied,
  /// and back to `Published` when it no longer does.
  pub async fn save_definition(
    &self,
    candidate: EntityDefinition,
    actor: Option<&str>,
  ) -> Result<EntityDefinition> {
    let _guard = self.locks.lock(candidate.id).await;

    let all = self.all_definitions().await?;
    let existing = all.iter().find(|d| d.id == candidate.id);
    let mut definition = candidate;
    prepare(&mut definition, existing);

    let result = check(&definition, existing, &all);
    if !result.is_valid() {
      return Err(Error::Validation(result.errors));
    }

    let now = Utc::now();
    definition.updated_at = now;
    definition.updated_by = actor.map(str::to_owned);
    match existing {
      None => {
        definition.created_at = now;
        definition.created_by = actor.map(str::to_owned);
      }
      Some(old) => {
        definition.created_at = old.created_at;
        definition.created_by = old.created_by.clone();
        if old.is_published() {
          let descriptor = compile_against(&definition, &all)
            .map_err(|source| self.compile_failed(&definition, source))?;
          let applied = old.applied_schema.clone().unwrap_or_default();
          let analysis = analyze_changes(&applied, &AppliedSchema::target(&descriptor));
          definition.status = if analysis.is_empty() {
            DefinitionStatus::Published
          } else {
            DefinitionStatus::Modified
          };
        }
      }
    }

    self
      .store
      .save_definition(definition.clone())
      .await
      .map_err(Error::store)?;

    self.cache.invalidate(definition.id);
    for dependent in all.iter().filter(|d| refers_to(d, definition.id)) {
      self.cache.invalidate(dependent.id);
    }

    info!(
      definition = %definition.full_type_name(),
      id = %definition.id,
      status = %definition.status,
      "definition saved"
    );
    self.audit.definition_changed(actor, existing, &definition);
    Ok(definition)
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_definition(&self, id: Uuid) -> Result<Option<EntityDefinition>> {
    self.store.get_definition(id).await.map_err(Error::store)
  }

  pub async fn list_definitions(&self) -> Result<Vec<EntityDefinition>> {
    self.all_definitions().await
  }

  pub(crate) async fn require_definition(&self, id: Uuid) -> Result<EntityDefinition> {
    self
      .get_definition(id)
      .await?
      .ok_or(Error::DefinitionNotFound(id))
  }

  async fn all_definitions(&self) -> Result<Vec<EntityDefinition>> {
    self.store.list_definitions().await.map_err(Error::store)
  }

  // ─── Compile ───────────────────────────────────────────────────────────────

  /// The compiled descriptor for a stored definition, from cache when
  /// current. Concurrent calls for the same id compile once.
  pub async fn compile(&self, id: Uuid) -> Result<Arc<CompiledTypeDescriptor>> {
    self
      .cache
      .get_or_compile(id, move || async move {
        let definition = self.require_definition(id).await?;
        self.compile_definition(&definition).await
      })
      .await
  }

  /// Compile `definition` against the stored definitions it references.
  /// Bypasses the cache.
  pub async fn compile_definition(&self, definition: &EntityDefinition) -> Result<CompiledTypeDescriptor> {
    let mut targets = HashMap::new();
    for id in referenced_ids(definition) {
      if let Some(target) = self.get_definition(id).await? {
        targets.insert(id, ReferenceTarget::of(&target));
      }
    }
    compile(definition, &targets).map_err(|source| self.compile_failed(definition, source))
  }

  /// Report a compile failure to the audit sink and wrap it.
  fn compile_failed(&self, definition: &EntityDefinition, source: forma_core::Error) -> Error {
    self.audit.compile_failed(definition, &source);
    Error::Compile {
      definition_id: definition.id,
      source,
    }
  }

  /// Validate a stored definition again before publishing it.
  pub(crate) async fn revalidate(&self, definition: &EntityDefinition) -> Result<()> {
    let all = self.all_definitions().await?;
    let result = check(definition, None, &all);
    if result.is_valid() {
      Ok(())
    } else {
      Err(Error::Validation(result.errors))
    }
  }
}

fn check(
  candidate: &EntityDefinition,
  existing: Option<&EntityDefinition>,
  all: &[EntityDefinition],
) -> ValidationResult {
  let others: Vec<KnownDefinition> = all
    .iter()
    .filter(|d| d.id != candidate.id)
    .map(KnownDefinition::from)
    .collect();
  validate_definition(candidate, &ValidationContext {
    existing,
    others: &others,
  })
}

fn compile_against(
  definition: &EntityDefinition,
  all: &[EntityDefinition],
) -> forma_core::Result<CompiledTypeDescriptor> {
  let targets = all
    .iter()
    .map(|d| (d.id, ReferenceTarget::of(d)))
    .collect();
  compile(definition, &targets)
}

fn referenced_ids(definition: &EntityDefinition) -> Vec<Uuid> {
  let sub_fields = definition.sub_entities.iter().flat_map(|s| s.fields.iter());
  let mut ids: Vec<Uuid> = definition
    .fields
    .iter()
    .chain(sub_fields)
    .filter_map(|f| f.referenced_entity_id)
    .chain(definition.parent.as_ref().map(|p| p.parent_definition_id))
    .filter(|id| *id != definition.id)
    .collect();
  ids.sort();
  ids.dedup();
  ids
}

fn refers_to(definition: &EntityDefinition, target: Uuid) -> bool {
  definition.id != target && referenced_ids(definition).contains(&target)
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Bring a candidate into the shape the engine stores.
fn prepare(candidate: &mut EntityDefinition, existing: Option<&EntityDefinition>) {
  if candidate.route.trim().is_empty() {
    candidate.route = default_route(&candidate.entity_name);
  }
  if let Some(old) = existing {
    adopt_ids(candidate, old);
  }
  server_owned(candidate, existing);
  seed_primary_key(candidate, existing);
  materialize_interfaces(candidate, existing);

  let providers: Vec<_> = candidate
    .interfaces
    .iter()
    .filter(|i| i.is_enabled)
    .map(|i| i.kind)
    .collect();
  candidate.fields.retain(|f| {
    if f.published_revision.is_some() {
      return true;
    }
    !f.is_deleted
      && (f.source != FieldSource::Interface
        || providers.iter().any(|k| k.provides(&f.property_name)))
  });
  for sub in &mut candidate.sub_entities {
    sub
      .fields
      .retain(|f| !f.is_deleted || f.published_revision.is_some());
  }
}

/// Callers that rebuild a definition from scratch get fresh ids for
/// everything; map those back onto the stored ids by name.
fn adopt_ids(candidate: &mut EntityDefinition, old: &EntityDefinition) {
  adopt_field_ids(&mut candidate.fields, &old.fields);

  for sub in &mut candidate.sub_entities {
    let known = old.sub_entities.iter().any(|s| s.id == sub.id);
    if !known && let Some(prev) = old.sub_entity(&sub.code) {
      sub.id = prev.id;
    }
    if let Some(prev) = old.sub_entities.iter().find(|s| s.id == sub.id) {
      adopt_field_ids(&mut sub.fields, &prev.fields);
    }
  }

  for interface in &mut candidate.interfaces {
    if let Some(prev) = old.interface(interface.kind) {
      interface.id = prev.id;
    }
  }
}

fn adopt_field_ids(fields: &mut [FieldMetadata], old: &[FieldMetadata]) {
  let claimed: Vec<Uuid> = fields.iter().map(|f| f.id).collect();
  let mut taken: Vec<Uuid> = Vec::new();
  for field in fields.iter_mut() {
    if old.iter().any(|o| o.id == field.id) {
      continue;
    }
    let prev = old.iter().find(|o| {
      !o.is_deleted
        && o.property_name.eq_ignore_ascii_case(&field.property_name)
        && !claimed.contains(&o.id)
        && !taken.contains(&o.id)
    });
    if let Some(prev) = prev {
      field.id = prev.id;
      taken.push(prev.id);
    }
  }
}

fn server_owned(candidate: &mut EntityDefinition, existing: Option<&EntityDefinition>) {
  let published_revision = |id: Uuid, old: Option<&[FieldMetadata]>| {
    old.and_then(|fields| fields.iter().find(|f| f.id == id))
      .and_then(|f| f.published_revision)
  };

  candidate.status = existing.map_or(DefinitionStatus::Draft, |o| o.status);
  candidate.is_locked = existing.is_some_and(|o| o.is_locked);
  candidate.revision = existing.map_or(0, |o| o.revision);
  candidate.applied_schema = existing.and_then(|o| o.applied_schema.clone());

  for interface in &mut candidate.interfaces {
    interface.is_locked = existing
      .and_then(|o| o.interface(interface.kind))
      .is_some_and(|i| i.is_locked);
  }

  let root = existing.map(|o| o.fields.as_slice());
  for field in &mut candidate.fields {
    field.published_revision = published_revision(field.id, root);
  }

  for sub in &mut candidate.sub_entities {
    let prev = existing.and_then(|o| o.sub_entities.iter().find(|s| s.id == sub.id));
    sub.published_revision = prev.and_then(|p| p.published_revision);
    let prev_fields = prev.map(|p| p.fields.as_slice());
    for field in &mut sub.fields {
      field.published_revision = published_revision(field.id, prev_fields);
    }
  }
}

fn seed_primary_key(candidate: &mut EntityDefinition, existing: Option<&EntityDefinition>) {
  let present = candidate
    .fields
    .iter()
    .any(|f| f.property_name.eq_ignore_ascii_case(PRIMARY_KEY));
  if present {
    return;
  }
  let field = existing
    .and_then(|o| o.field(PRIMARY_KEY))
    .cloned()
    .unwrap_or_else(|| {
      FieldMetadata::new(PRIMARY_KEY, FieldType::Long)
        .required()
        .sort_order(i32::MIN)
        .source(FieldSource::System)
    });
  candidate.fields.insert(0, field);
}

/// Give every enabled interface a stored row per template field, reusing
/// the stored row when the interface was enabled before.
fn materialize_interfaces(candidate: &mut EntityDefinition, existing: Option<&EntityDefinition>) {
  let kinds: Vec<_> = candidate
    .interfaces
    .iter()
    .filter(|i| i.is_enabled)
    .map(|i| i.kind)
    .collect();
  for kind in kinds {
    for template in kind.fields() {
      let present = candidate
        .fields
        .iter()
        .any(|f| f.property_name.eq_ignore_ascii_case(&template.property_name));
      if present {
        continue;
      }
      let field = existing
        .and_then(|o| o.field(&template.property_name))
        .filter(|f| f.source == FieldSource::Interface)
        .cloned()
        .unwrap_or(template);
      candidate.fields.push(field);
    }
  }
}

#[cfg(test)]
mod tests {
  use forma_core::{definition::SubEntityDefinition, interface::InterfaceKind};

  use super::*;

  #[test]
  fn prepare_seeds_primary_key_and_interface_rows() {
    let mut def = EntityDefinition::new("Sales", "Product")
      .with_field(FieldMetadata::string("Code", 64))
      .with_interface(InterfaceKind::Audit);
    def.route.clear();
    prepare(&mut def, None);

    assert_eq!(def.route, "product");
    let id = def.field("Id").unwrap();
    assert_eq!(id.source, FieldSource::System);
    assert_eq!(id.field_type(), Some(FieldType::Long));
    for name in ["CreatedAt", "CreatedBy", "UpdatedAt", "UpdatedBy"] {
      assert_eq!(def.field(name).unwrap().source, FieldSource::Interface, "{name}");
    }
  }

  #[test]
  fn prepare_drops_rows_of_disabled_unpublished_interfaces() {
    let mut def = EntityDefinition::new("Sales", "Product").with_interface(InterfaceKind::SoftDelete);
    prepare(&mut def, None);
    assert!(def.field("IsDeleted").is_some());

    def.interfaces[0].is_enabled = false;
    prepare(&mut def, None);
    assert!(def.field("IsDeleted").is_none());
  }

  #[test]
  fn prepare_keeps_stored_ids_and_server_state() {
    let mut stored = EntityDefinition::new("Sales", "Order")
      .with_field(FieldMetadata::string("Number", 32))
      .with_sub_entity(SubEntityDefinition::new("Lines").with_field(FieldMetadata::new("Qty", FieldType::Integer)));
    prepare(&mut stored, None);
    stored.status = DefinitionStatus::Published;
    stored.is_locked = true;
    stored.revision = 1;
    for f in &mut stored.fields {
      f.published_revision = Some(1);
    }
    stored.sub_entities[0].published_revision = Some(1);
    stored.sub_entities[0].fields[0].published_revision = Some(1);

    // Rebuilt by a client that lost every id and lies about the status.
    let mut rebuilt = EntityDefinition::new("Sales", "Order")
      .with_field(FieldMetadata::string("Number", 32))
      .with_sub_entity(SubEntityDefinition::new("Lines").with_field(FieldMetadata::new("Qty", FieldType::Integer)));
    rebuilt.id = stored.id;
    rebuilt.status = DefinitionStatus::Draft;
    prepare(&mut rebuilt, Some(&stored));

    assert_eq!(rebuilt.status, DefinitionStatus::Published);
    assert!(rebuilt.is_locked);
    assert_eq!(rebuilt.field("Number").unwrap().id, stored.field("Number").unwrap().id);
    assert_eq!(rebuilt.field("Id").unwrap().id, stored.field("Id").unwrap().id);
    assert_eq!(rebuilt.field("Number").unwrap().published_revision, Some(1));
    assert_eq!(rebuilt.sub_entities[0].id, stored.sub_entities[0].id);
    assert_eq!(rebuilt.sub_entities[0].fields[0].id, stored.sub_entities[0].fields[0].id);
    assert_eq!(rebuilt.sub_entities[0].published_revision, Some(1));
  }
}
