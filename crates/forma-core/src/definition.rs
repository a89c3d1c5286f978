//! Entity definitions: the aggregate an operator edits at runtime.
//!
//! An [`EntityDefinition`] owns its root fields, its capability interfaces
//! and its sub-entities. Everything physical (table names, foreign keys) is
//! derived from the names recorded here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{field::FieldMetadata, interface::InterfaceKind, schema::AppliedSchema};

// ─── Localized text ──────────────────────────────────────────────────────────

/// A locale → text map, e.g. `{"en": "Product", "de": "Produkt"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(pub BTreeMap<String, String>);

impl LocalizedText {
  pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
    Self::default().with(locale, text)
  }

  pub fn with(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
    self.0.insert(locale.into(), text.into());
    self
  }

  pub fn get(&self, locale: &str) -> Option<&str> {
    self.0.get(locale).map(String::as_str)
  }

  /// True when no locale carries non-whitespace text.
  pub fn is_blank(&self) -> bool { self.0.values().all(|t| t.trim().is_empty()) }
}

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum StructureType {
  #[default]
  Single,
  MasterDetail,
}

/// Lifecycle of a definition.
///
/// `Draft` has never been published. `Published` matches the physical table.
/// `Modified` is a published definition with edits that are not yet
/// physical.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum DefinitionStatus {
  #[default]
  Draft,
  Published,
  Modified,
}

/// Delete behaviour of a foreign key.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum CascadeBehavior {
  #[default]
  Restrict,
  Cascade,
  SetNull,
}

impl CascadeBehavior {
  pub fn sql(self) -> &'static str {
    match self {
      Self::Restrict => "RESTRICT",
      Self::Cascade => "CASCADE",
      Self::SetNull => "SET NULL",
    }
  }
}

fn cascade_children() -> CascadeBehavior { CascadeBehavior::Cascade }

fn enabled() -> bool { true }

// ─── Parent linkage ──────────────────────────────────────────────────────────

/// Links a root definition to a parent definition it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
  pub parent_definition_id: Uuid,
  pub foreign_key_field:    String,
  /// Name of the collection on the parent that holds these rows.
  pub collection_name:      String,
  #[serde(default = "cascade_children")]
  pub cascade:              CascadeBehavior,
}

// ─── Interfaces ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInterface {
  #[serde(default = "Uuid::new_v4")]
  pub id:         Uuid,
  pub kind:       InterfaceKind,
  #[serde(default = "enabled")]
  pub is_enabled: bool,
  /// Set when the interface's fields became physical. Locked interfaces
  /// can no longer be removed or disabled.
  #[serde(default)]
  pub is_locked:  bool,
}

impl EntityInterface {
  pub fn new(kind: InterfaceKind) -> Self {
    Self {
      id: Uuid::new_v4(),
      kind,
      is_enabled: true,
      is_locked: false,
    }
  }
}

// ─── Sub-entities ────────────────────────────────────────────────────────────

/// A child collection of a master-detail definition. Backed by its own table
/// named `<RootTable>_<Code>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubEntityDefinition {
  #[serde(default = "Uuid::new_v4")]
  pub id:                 Uuid,
  pub code:               String,
  #[serde(default)]
  pub display_name:       LocalizedText,
  #[serde(default)]
  pub description:        LocalizedText,
  #[serde(default)]
  pub sort_order:         i32,
  #[serde(default)]
  pub default_sort_field: Option<String>,
  #[serde(default)]
  pub sort_descending:    bool,
  /// Defaults to `<EntityName>Id`.
  #[serde(default)]
  pub foreign_key_field:  Option<String>,
  /// Defaults to the code.
  #[serde(default)]
  pub collection_name:    Option<String>,
  #[serde(default = "cascade_children")]
  pub cascade:            CascadeBehavior,
  #[serde(default)]
  pub published_revision: Option<u64>,
  #[serde(default)]
  pub fields:             Vec<FieldMetadata>,
}

impl SubEntityDefinition {
  pub fn new(code: impl Into<String>) -> Self {
    Self {
      id:                 Uuid::new_v4(),
      code:               code.into(),
      display_name:       LocalizedText::default(),
      description:        LocalizedText::default(),
      sort_order:         0,
      default_sort_field: None,
      sort_descending:    false,
      foreign_key_field:  None,
      collection_name:    None,
      cascade:            CascadeBehavior::Cascade,
      published_revision: None,
      fields:             Vec::new(),
    }
  }

  pub fn with_field(mut self, field: FieldMetadata) -> Self {
    self.fields.push(field);
    self
  }

  pub fn foreign_key(&self, root_entity_name: &str) -> String {
    self
      .foreign_key_field
      .clone()
      .unwrap_or_else(|| format!("{root_entity_name}Id"))
  }

  pub fn collection(&self) -> &str {
    self.collection_name.as_deref().unwrap_or(&self.code)
  }

  pub fn table_name(&self, root_table: &str) -> String {
    format!("{root_table}_{}", self.code)
  }

  pub fn active_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
    self.fields.iter().filter(|f| !f.is_deleted)
  }
}

// ─── Definition ──────────────────────────────────────────────────────────────

/// The aggregate root describing one business entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
  #[serde(default = "Uuid::new_v4")]
  pub id:             Uuid,
  pub namespace:      String,
  pub entity_name:    String,
  /// URL slug; defaults to the kebab-cased entity name.
  #[serde(default)]
  pub route:          String,
  #[serde(default)]
  pub display_name:   LocalizedText,
  #[serde(default)]
  pub description:    LocalizedText,
  #[serde(default)]
  pub structure:      StructureType,
  #[serde(default)]
  pub status:         DefinitionStatus,
  #[serde(default)]
  pub is_locked:      bool,
  #[serde(default = "enabled")]
  pub is_enabled:     bool,
  #[serde(default)]
  pub parent:         Option<ParentLink>,
  #[serde(default)]
  pub fields:         Vec<FieldMetadata>,
  #[serde(default)]
  pub interfaces:     Vec<EntityInterface>,
  #[serde(default)]
  pub sub_entities:   Vec<SubEntityDefinition>,
  /// Number of successful publishes.
  #[serde(default)]
  pub revision:       u64,
  /// Physical shape as of the last successful publish.
  #[serde(default)]
  pub applied_schema: Option<AppliedSchema>,
  #[serde(default = "Utc::now")]
  pub created_at:     DateTime<Utc>,
  #[serde(default)]
  pub created_by:     Option<String>,
  #[serde(default = "Utc::now")]
  pub updated_at:     DateTime<Utc>,
  #[serde(default)]
  pub updated_by:     Option<String>,
}

impl EntityDefinition {
  pub fn new(namespace: impl Into<String>, entity_name: impl Into<String>) -> Self {
    let entity_name = entity_name.into();
    let now = Utc::now();
    Self {
      id:             Uuid::new_v4(),
      namespace:      namespace.into(),
      route:          default_route(&entity_name),
      display_name:   LocalizedText::new("en", entity_name.clone()),
      entity_name,
      description:    LocalizedText::default(),
      structure:      StructureType::Single,
      status:         DefinitionStatus::Draft,
      is_locked:      false,
      is_enabled:     true,
      parent:         None,
      fields:         Vec::new(),
      interfaces:     Vec::new(),
      sub_entities:   Vec::new(),
      revision:       0,
      applied_schema: None,
      created_at:     now,
      created_by:     None,
      updated_at:     now,
      updated_by:     None,
    }
  }

  pub fn with_field(mut self, field: FieldMetadata) -> Self {
    self.fields.push(field);
    self
  }

  pub fn with_interface(mut self, kind: InterfaceKind) -> Self {
    self.interfaces.push(EntityInterface::new(kind));
    self
  }

  pub fn with_sub_entity(mut self, sub: SubEntityDefinition) -> Self {
    self.structure = StructureType::MasterDetail;
    self.sub_entities.push(sub);
    self
  }

  /// `namespace.EntityName`
  pub fn full_type_name(&self) -> String {
    format!("{}.{}", self.namespace, self.entity_name)
  }

  pub fn table_name(&self) -> String { table_name_for(&self.entity_name) }

  pub fn active_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
    self.fields.iter().filter(|f| !f.is_deleted)
  }

  /// Case-insensitive lookup among the non-deleted root fields.
  pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
    self
      .active_fields()
      .find(|f| f.property_name.eq_ignore_ascii_case(name))
  }

  pub fn field_by_id(&self, id: Uuid) -> Option<&FieldMetadata> {
    self.fields.iter().find(|f| f.id == id)
  }

  pub fn sub_entity(&self, code: &str) -> Option<&SubEntityDefinition> {
    self
      .sub_entities
      .iter()
      .find(|s| s.code.eq_ignore_ascii_case(code))
  }

  pub fn interface(&self, kind: InterfaceKind) -> Option<&EntityInterface> {
    self.interfaces.iter().find(|i| i.kind == kind)
  }

  pub fn has_enabled_interface(&self, kind: InterfaceKind) -> bool {
    self.interface(kind).is_some_and(|i| i.is_enabled)
  }

  pub fn is_published(&self) -> bool { self.status != DefinitionStatus::Draft }
}

/// Backing table for an entity name.
pub fn table_name_for(entity_name: &str) -> String { format!("{entity_name}s") }

/// `PurchaseOrder` → `purchase-order`
pub fn default_route(entity_name: &str) -> String {
  let mut out = String::with_capacity(entity_name.len() + 4);
  for (i, ch) in entity_name.chars().enumerate() {
    if ch.is_ascii_uppercase() {
      if i > 0 {
        out.push('-');
      }
      out.push(ch.to_ascii_lowercase());
    } else if ch == '_' {
      out.push('-');
    } else {
      out.push(ch);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derived_names() {
    let def = EntityDefinition::new("Sales", "PurchaseOrder");
    assert_eq!(def.full_type_name(), "Sales.PurchaseOrder");
    assert_eq!(def.table_name(), "PurchaseOrders");
    assert_eq!(def.route, "purchase-order");

    let lines = SubEntityDefinition::new("Lines");
    assert_eq!(lines.table_name(&def.table_name()), "PurchaseOrders_Lines");
    assert_eq!(lines.foreign_key(&def.entity_name), "PurchaseOrderId");
    assert_eq!(lines.collection(), "Lines");
  }

  #[test]
  fn minimal_json_fills_defaults() {
    let def: EntityDefinition = serde_json::from_str(
      r#"{"namespace":"Catalog","entityName":"Product","fields":[
           {"propertyName":"Code","dataType":"String","length":64,"isRequired":true}
         ]}"#,
    )
    .unwrap();
    assert_eq!(def.status, DefinitionStatus::Draft);
    assert!(def.is_enabled);
    assert!(!def.is_locked);
    assert_eq!(def.fields.len(), 1);
    assert_eq!(def.fields[0].length, Some(64));
  }

  #[test]
  fn blank_localized_text() {
    assert!(LocalizedText::default().is_blank());
    assert!(LocalizedText::new("en", "  ").is_blank());
    assert!(!LocalizedText::new("en", "Product").is_blank());
  }
}
