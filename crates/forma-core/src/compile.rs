//! The type compiler: metadata in, [`CompiledTypeDescriptor`] out.
//!
//! Compilation is pure. Referenced definitions are resolved through a map the
//! caller prepares, so the same inputs always produce an equal descriptor.
//!
//! Effective field order:
//! 1. `Id`, then the other system and custom fields by sort order;
//! 2. interface fields, in interface order (materialized rows win over
//!    templates; a template is skipped when a same-named field exists);
//! 3. each sub-entity as a nested collection shape.

use std::collections::HashMap;

use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  collab::Localizer,
  definition::{CascadeBehavior, EntityDefinition, LocalizedText, SubEntityDefinition},
  field::{FieldMetadata, FieldRules, FieldSource, FieldType},
  value::DefaultValue,
};

/// Name of the primary-key column on every table.
pub const PRIMARY_KEY: &str = "Id";

// ─── Rules ───────────────────────────────────────────────────────────────────

/// A compiled regular expression that compares by its source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
  pub fn new(source: &str) -> Result<Self, regex::Error> { Regex::new(source).map(Self) }

  pub fn is_match(&self, text: &str) -> bool { self.0.is_match(text) }

  pub fn as_str(&self) -> &str { self.0.as_str() }
}

impl PartialEq for Pattern {
  fn eq(&self, other: &Self) -> bool { self.as_str() == other.as_str() }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledRules {
  pub min:        Option<Decimal>,
  pub max:        Option<Decimal>,
  pub min_length: Option<usize>,
  pub max_length: Option<usize>,
  pub pattern:    Option<Pattern>,
}

impl CompiledRules {
  fn build(rules: FieldRules) -> Result<Self, String> {
    let pattern = rules
      .pattern
      .as_deref()
      .map(Pattern::new)
      .transpose()
      .map_err(|e| e.to_string())?;
    Ok(Self {
      min: rules.min,
      max: rules.max,
      min_length: rules.min_length,
      max_length: rules.max_length,
      pattern,
    })
  }
}

// ─── Descriptor types ────────────────────────────────────────────────────────

/// Where a reference field points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTarget {
  pub definition_id:  Uuid,
  pub full_type_name: String,
  pub table_name:     String,
}

impl ReferenceTarget {
  pub fn of(definition: &EntityDefinition) -> Self {
    Self {
      definition_id:  definition.id,
      full_type_name: definition.full_type_name(),
      table_name:     definition.table_name(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledReference {
  pub target:               ReferenceTarget,
  pub on_delete:            CascadeBehavior,
  pub lookup_display_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledField {
  pub name:               String,
  pub display_name:       LocalizedText,
  pub field_type:         FieldType,
  pub length:             Option<u32>,
  pub precision:          Option<u32>,
  pub scale:              Option<u32>,
  pub required:           bool,
  pub unique:             bool,
  pub primary_key:        bool,
  /// Filled by the engine; callers may not write it.
  pub managed:            bool,
  pub default_value:      Option<DefaultValue>,
  pub reference:          Option<CompiledReference>,
  pub enum_code:          Option<String>,
  pub rules:              CompiledRules,
  pub source:             FieldSource,
  pub parent_field:       Option<String>,
  pub published_revision: Option<u64>,
}

impl CompiledField {
  /// A bare field with no constraints.
  pub fn synthetic(name: &str, field_type: FieldType, source: FieldSource) -> Self {
    Self {
      name: name.to_owned(),
      display_name: LocalizedText::new("en", name),
      field_type,
      length: None,
      precision: None,
      scale: None,
      required: false,
      unique: false,
      primary_key: false,
      managed: false,
      default_value: None,
      reference: None,
      enum_code: None,
      rules: CompiledRules::default(),
      source,
      parent_field: None,
      published_revision: None,
    }
  }

  /// Whether the column exists physically.
  pub fn is_live(&self) -> bool { self.published_revision.is_some() }

  fn primary_key(published_revision: Option<u64>) -> Self {
    Self {
      primary_key: true,
      managed: true,
      published_revision,
      ..Self::synthetic(PRIMARY_KEY, FieldType::Long, FieldSource::System)
    }
  }
}

/// A sub-entity compiled into a nested collection shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCollection {
  /// Property name of the collection on the parent record.
  pub name:               String,
  pub code:               String,
  pub display_name:       LocalizedText,
  pub table_name:         String,
  pub foreign_key:        String,
  pub cascade:            CascadeBehavior,
  pub default_sort:       Option<String>,
  pub sort_descending:    bool,
  pub published_revision: Option<u64>,
  pub fields:             Vec<CompiledField>,
}

impl CompiledCollection {
  pub fn is_live(&self) -> bool { self.published_revision.is_some() }

  pub fn field(&self, name: &str) -> Option<&CompiledField> {
    self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
  }

  pub fn live_fields(&self) -> impl Iterator<Item = &CompiledField> {
    self.fields.iter().filter(|f| f.is_live())
  }
}

/// What the live shape supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  pub soft_delete: bool,
  pub versioned:   bool,
  pub audited:     bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTypeDescriptor {
  pub definition_id:  Uuid,
  pub full_type_name: String,
  pub entity_name:    String,
  pub display_name:   LocalizedText,
  pub table_name:     String,
  pub revision:       u64,
  /// Whether a backing table exists.
  pub published:      bool,
  pub fields:         Vec<CompiledField>,
  pub collections:    Vec<CompiledCollection>,
  pub capabilities:   Capabilities,
}

impl CompiledTypeDescriptor {
  pub fn field(&self, name: &str) -> Option<&CompiledField> {
    self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
  }

  pub fn live_field(&self, name: &str) -> Option<&CompiledField> {
    self.field(name).filter(|f| f.is_live())
  }

  pub fn live_fields(&self) -> impl Iterator<Item = &CompiledField> {
    self.fields.iter().filter(|f| f.is_live())
  }

  pub fn collection(&self, name: &str) -> Option<&CompiledCollection> {
    self
      .collections
      .iter()
      .find(|c| c.name.eq_ignore_ascii_case(name))
  }

  pub fn live_collections(&self) -> impl Iterator<Item = &CompiledCollection> {
    self.collections.iter().filter(|c| c.is_live())
  }

  /// Field list for form and template builders.
  pub fn template_fields(&self, localizer: &dyn Localizer, locale: &str) -> Vec<TemplateField> {
    let root = self.fields.iter().map(|f| TemplateField::of(f, None, localizer, locale));
    let nested = self.collections.iter().flat_map(|c| {
      c.fields
        .iter()
        .filter(|f| !f.primary_key && !f.name.eq_ignore_ascii_case(&c.foreign_key))
        .map(|f| TemplateField::of(f, Some(&c.name), localizer, locale))
    });
    root.chain(nested).collect()
  }
}

/// One field as seen by a template consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
  pub property_name: String,
  pub label:         String,
  pub data_type:     FieldType,
  pub required:      bool,
  pub read_only:     bool,
  pub max_length:    Option<u32>,
  /// Full type name of the referenced entity.
  pub reference:     Option<String>,
  pub collection:    Option<String>,
}

impl TemplateField {
  fn of(
    field: &CompiledField,
    collection: Option<&str>,
    localizer: &dyn Localizer,
    locale: &str,
  ) -> Self {
    Self {
      property_name: field.name.clone(),
      label:         localizer.label(&field.display_name, locale, &field.name),
      data_type:     field.field_type,
      required:      field.required,
      read_only:     field.managed,
      max_length:    field.length,
      reference:     field.reference.as_ref().map(|r| r.target.full_type_name.clone()),
      collection:    collection.map(str::to_owned),
    }
  }
}

// ─── Compilation ─────────────────────────────────────────────────────────────

/// Compile `definition`. `references` must contain every definition a field
/// or the parent link points to, except the definition itself.
pub fn compile(
  definition: &EntityDefinition,
  references: &HashMap<Uuid, ReferenceTarget>,
) -> Result<CompiledTypeDescriptor> {
  let ctx = Ctx {
    definition,
    references,
    own: ReferenceTarget::of(definition),
    managed: definition
      .interfaces
      .iter()
      .filter(|i| i.is_enabled)
      .flat_map(|i| i.kind.managed_fields().iter().copied())
      .collect(),
    unique: definition
      .interfaces
      .iter()
      .filter(|i| i.is_enabled)
      .flat_map(|i| i.kind.unique_fields().iter().copied())
      .collect(),
  };

  let active: Vec<&FieldMetadata> = definition.active_fields().collect();

  // ── Own fields ──
  let mut own: Vec<&FieldMetadata> = active
    .iter()
    .copied()
    .filter(|f| f.source != FieldSource::Interface)
    .collect();
  own.sort_by(|a, b| field_order(a, b));

  let id_revision = own
    .iter()
    .find(|f| f.property_name.eq_ignore_ascii_case(PRIMARY_KEY))
    .map(|f| f.published_revision)
    .unwrap_or_else(|| (definition.revision > 0).then_some(1));

  let mut fields = vec![CompiledField::primary_key(id_revision)];
  if let Some(parent) = &definition.parent {
    let target = ctx.resolve(&parent.foreign_key_field, parent.parent_definition_id)?;
    fields.push(CompiledField {
      required: true,
      reference: Some(CompiledReference {
        target,
        on_delete: parent.cascade,
        lookup_display_field: None,
      }),
      published_revision: id_revision,
      ..CompiledField::synthetic(&parent.foreign_key_field, FieldType::EntityRef, FieldSource::System)
    });
  }
  for meta in own
    .iter()
    .filter(|f| !f.property_name.eq_ignore_ascii_case(PRIMARY_KEY))
  {
    fields.push(ctx.field(meta, &active)?);
  }

  // ── Interface fields ──
  let mut taken: Vec<Uuid> = Vec::new();
  for interface in definition.interfaces.iter().filter(|i| i.is_enabled) {
    for template in interface.kind.fields() {
      if fields
        .iter()
        .any(|f| f.name.eq_ignore_ascii_case(&template.property_name))
      {
        continue;
      }
      let materialized = active.iter().copied().find(|f| {
        f.source == FieldSource::Interface
          && f.property_name.eq_ignore_ascii_case(&template.property_name)
      });
      match materialized {
        Some(meta) => {
          taken.push(meta.id);
          fields.push(ctx.field(meta, &active)?);
        }
        None => fields.push(ctx.field(&template, &active)?),
      }
    }
  }
  // Materialized rows of interfaces that are no longer enabled.
  let mut leftovers: Vec<&FieldMetadata> = active
    .iter()
    .copied()
    .filter(|f| f.source == FieldSource::Interface && !taken.contains(&f.id))
    .filter(|f| !fields.iter().any(|c| c.name.eq_ignore_ascii_case(&f.property_name)))
    .collect();
  leftovers.sort_by(|a, b| field_order(a, b));
  for meta in leftovers {
    fields.push(ctx.field(meta, &active)?);
  }

  // ── Collections ──
  let mut subs: Vec<&SubEntityDefinition> = definition.sub_entities.iter().collect();
  subs.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.code.cmp(&b.code)));
  let collections = subs
    .into_iter()
    .map(|sub| ctx.collection(sub))
    .collect::<Result<Vec<_>>>()?;

  let capabilities = capabilities(definition, &fields);

  Ok(CompiledTypeDescriptor {
    definition_id: definition.id,
    full_type_name: definition.full_type_name(),
    entity_name: definition.entity_name.clone(),
    display_name: definition.display_name.clone(),
    table_name: definition.table_name(),
    revision: definition.revision,
    published: definition.is_published(),
    fields,
    collections,
    capabilities,
  })
}

fn field_order(a: &FieldMetadata, b: &FieldMetadata) -> std::cmp::Ordering {
  a.sort_order
    .cmp(&b.sort_order)
    .then_with(|| a.property_name.to_lowercase().cmp(&b.property_name.to_lowercase()))
}

fn capabilities(definition: &EntityDefinition, fields: &[CompiledField]) -> Capabilities {
  use crate::interface::InterfaceKind;

  let live = |name: &str, types: &[FieldType]| {
    fields
      .iter()
      .any(|f| f.is_live() && f.name.eq_ignore_ascii_case(name) && types.contains(&f.field_type))
  };
  Capabilities {
    soft_delete: definition.has_enabled_interface(InterfaceKind::SoftDelete)
      && live("IsDeleted", &[FieldType::Boolean]),
    versioned:   live("Version", &[FieldType::Integer, FieldType::Long]),
    audited:     definition.has_enabled_interface(InterfaceKind::Audit)
      && live("CreatedAt", &[FieldType::DateTime]),
  }
}

struct Ctx<'a> {
  definition: &'a EntityDefinition,
  references: &'a HashMap<Uuid, ReferenceTarget>,
  own:        ReferenceTarget,
  managed:    Vec<&'static str>,
  unique:     Vec<&'static str>,
}

impl Ctx<'_> {
  fn resolve(&self, field: &str, id: Uuid) -> Result<ReferenceTarget> {
    if id == self.definition.id {
      return Ok(self.own.clone());
    }
    self
      .references
      .get(&id)
      .cloned()
      .ok_or_else(|| Error::UnresolvedReference {
        field:     field.to_owned(),
        entity_id: id,
      })
  }

  /// `siblings` are the other fields of the same owner, for parent lookup.
  fn field(&self, meta: &FieldMetadata, siblings: &[&FieldMetadata]) -> Result<CompiledField> {
    let name = meta.property_name.as_str();
    let field_type: FieldType =
      meta
        .data_type
        .parse()
        .map_err(|_| Error::UnknownDataType {
          field: name.to_owned(),
          code:  meta.data_type.clone(),
        })?;

    let reference = match field_type {
      FieldType::EntityRef => {
        let id = meta
          .referenced_entity_id
          .ok_or_else(|| Error::UnresolvedReference {
            field:     name.to_owned(),
            entity_id: Uuid::nil(),
          })?;
        Some(CompiledReference {
          target:               self.resolve(name, id)?,
          on_delete:            meta.on_delete,
          lookup_display_field: meta.lookup_display_field.clone(),
        })
      }
      _ => None,
    };

    let default_value = meta
      .default_value
      .as_deref()
      .map(|raw| DefaultValue::parse(field_type, raw))
      .transpose()
      .map_err(|message| Error::InvalidDefault {
        field: name.to_owned(),
        message,
      })?;

    let rules = match &meta.validation_rules {
      Some(raw) => FieldRules::parse(raw)
        .and_then(CompiledRules::build)
        .map_err(|message| Error::InvalidRules {
          field: name.to_owned(),
          message,
        })?,
      None => CompiledRules::default(),
    };

    let parent_field = meta.parent_field_id.and_then(|pid| {
      siblings
        .iter()
        .find(|f| f.id == pid)
        .map(|f| f.property_name.clone())
    });

    let (precision, scale) = match field_type {
      FieldType::Decimal => (Some(meta.effective_precision()), Some(meta.effective_scale())),
      _ => (None, None),
    };

    Ok(CompiledField {
      name: name.to_owned(),
      display_name: meta.display_name.clone(),
      field_type,
      length: matches!(field_type, FieldType::String).then_some(meta.length).flatten(),
      precision,
      scale,
      required: meta.is_required,
      unique: self.unique.iter().any(|u| u.eq_ignore_ascii_case(name)),
      primary_key: false,
      managed: self.managed.iter().any(|m| m.eq_ignore_ascii_case(name)),
      default_value,
      reference,
      enum_code: meta.enum_code.clone(),
      rules,
      source: meta.source,
      parent_field,
      published_revision: meta.published_revision,
    })
  }

  fn collection(&self, sub: &SubEntityDefinition) -> Result<CompiledCollection> {
    let root_table = self.definition.table_name();
    let foreign_key = sub.foreign_key(&self.definition.entity_name);

    let mut fields = vec![
      CompiledField::primary_key(sub.published_revision),
      CompiledField {
        required: true,
        managed: true,
        reference: Some(CompiledReference {
          target:               self.own.clone(),
          on_delete:            sub.cascade,
          lookup_display_field: None,
        }),
        published_revision: sub.published_revision,
        ..CompiledField::synthetic(&foreign_key, FieldType::EntityRef, FieldSource::System)
      },
    ];

    let active: Vec<&FieldMetadata> = sub.active_fields().collect();
    let mut ordered = active.clone();
    ordered.sort_by(|a, b| field_order(a, b));
    for meta in ordered {
      let mut field = self.field(meta, &active)?;
      // Interfaces describe the root table only.
      field.managed = false;
      field.unique = false;
      fields.push(field);
    }

    Ok(CompiledCollection {
      name: sub.collection().to_owned(),
      code: sub.code.clone(),
      display_name: sub.display_name.clone(),
      table_name: sub.table_name(&root_table),
      foreign_key,
      cascade: sub.cascade,
      default_sort: sub.default_sort_field.clone(),
      sort_descending: sub.sort_descending,
      published_revision: sub.published_revision,
      fields,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{collab::FallbackLocalizer, interface::InterfaceKind};

  fn product() -> EntityDefinition {
    EntityDefinition::new("Catalog", "Product")
      .with_field(FieldMetadata::string("Name", 200).required().sort_order(2))
      .with_field(FieldMetadata::string("Code", 64).required().sort_order(1))
  }

  #[test]
  fn own_fields_follow_sort_order_after_id() {
    let d = compile(&product(), &HashMap::new()).unwrap();
    let names: Vec<_> = d.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["Id", "Code", "Name"]);
    assert!(d.fields[0].primary_key);
    assert_eq!(d.table_name, "Products");
    assert_eq!(d.full_type_name, "Catalog.Product");
  }

  #[test]
  fn compile_is_deterministic() {
    let def = product().with_interface(InterfaceKind::Audit);
    let a = compile(&def, &HashMap::new()).unwrap();
    let b = compile(&def, &HashMap::new()).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn interface_templates_come_after_own_fields_without_duplicates() {
    let def = product()
      .with_interface(InterfaceKind::Archive)
      .with_interface(InterfaceKind::SoftDelete);
    let d = compile(&def, &HashMap::new()).unwrap();
    let names: Vec<_> = d.fields.iter().map(|f| f.name.as_str()).collect();
    // Archive's Code/Name already exist as own fields.
    assert_eq!(names, ["Id", "Code", "Name", "IsDeleted", "DeletedAt", "DeletedBy"]);
    assert!(d.field("code").unwrap().unique);
    assert!(d.field("IsDeleted").unwrap().managed);
  }

  #[test]
  fn unknown_type_code_fails() {
    let mut def = product();
    def.fields[0].data_type = "Money".into();
    let err = compile(&def, &HashMap::new()).unwrap_err();
    assert!(matches!(err, Error::UnknownDataType { ref code, .. } if code == "Money"));
  }

  #[test]
  fn references_resolve_through_map_or_self() {
    let category = EntityDefinition::new("Catalog", "Category");
    let mut def = product().with_field(FieldMetadata::reference("Category", category.id));
    let err = compile(&def, &HashMap::new()).unwrap_err();
    assert!(matches!(err, Error::UnresolvedReference { .. }));

    let refs = HashMap::from([(category.id, ReferenceTarget::of(&category))]);
    let d = compile(&def, &refs).unwrap();
    let target = &d.field("Category").unwrap().reference.as_ref().unwrap().target;
    assert_eq!(target.table_name, "Categorys");

    let own_id = def.id;
    def = def.with_field(FieldMetadata::reference("Parent", own_id));
    let d = compile(&def, &refs).unwrap();
    let target = &d.field("Parent").unwrap().reference.as_ref().unwrap().target;
    assert_eq!(target.table_name, "Products");
  }

  #[test]
  fn sub_entities_become_collections() {
    let def = EntityDefinition::new("Sales", "Order").with_sub_entity(
      SubEntityDefinition::new("Lines").with_field(FieldMetadata::new("Quantity", FieldType::Integer)),
    );
    let d = compile(&def, &HashMap::new()).unwrap();
    let lines = d.collection("lines").unwrap();
    assert_eq!(lines.table_name, "Orders_Lines");
    assert_eq!(lines.foreign_key, "OrderId");
    let names: Vec<_> = lines.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["Id", "OrderId", "Quantity"]);
  }

  #[test]
  fn live_shape_tracks_published_revision() {
    let mut def = product().with_interface(InterfaceKind::SoftDelete);
    let d = compile(&def, &HashMap::new()).unwrap();
    assert_eq!(d.live_fields().count(), 0);
    assert!(!d.capabilities.soft_delete);

    def.revision = 1;
    for f in &mut def.fields {
      f.published_revision = Some(1);
    }
    def.fields.extend(InterfaceKind::SoftDelete.fields().into_iter().map(|mut f| {
      f.published_revision = Some(1);
      f
    }));
    let d = compile(&def, &HashMap::new()).unwrap();
    assert!(d.live_field("Id").is_some());
    assert!(d.live_field("IsDeleted").is_some());
    assert!(d.capabilities.soft_delete);
    assert!(!d.capabilities.versioned);
  }

  #[test]
  fn invalid_rules_fail_compilation() {
    let mut def = product();
    def.fields[0].validation_rules = Some(serde_json::json!({"pattern": "["}));
    assert!(matches!(
      compile(&def, &HashMap::new()).unwrap_err(),
      Error::InvalidRules { .. }
    ));
  }

  #[test]
  fn template_fields_use_localized_labels() {
    let mut def = product();
    def.fields[0].display_name = LocalizedText::new("en", "Name").with("de", "Bezeichnung");
    let d = compile(&def, &HashMap::new()).unwrap();
    let localizer = FallbackLocalizer::default();
    let fields = d.template_fields(&localizer, "de");
    let name = fields.iter().find(|f| f.property_name == "Name").unwrap();
    assert_eq!(name.label, "Bezeichnung");
    assert!(fields.iter().find(|f| f.property_name == "Id").unwrap().read_only);
  }
}
