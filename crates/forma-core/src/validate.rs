//! The definition validator.
//!
//! [`validate_definition`] checks a candidate aggregate against naming,
//! uniqueness, type and reference rules and, when a stored version exists,
//! against the lock rules. It is pure: everything it needs from the store
//! comes in through [`ValidationContext`].
//!
//! Property paths: root attributes by name (`EntityName`), root fields by
//! property name (`Code`), sub-entity fields as `Lines.Quantity`,
//! sub-entities as `SubEntities.Lines`, interfaces as `Interfaces.Audit`.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::{
  compile::PRIMARY_KEY,
  definition::{CascadeBehavior, EntityDefinition, StructureType, SubEntityDefinition},
  field::{FieldMetadata, FieldRules, FieldSource, FieldType, MAX_DECIMAL_PRECISION, MAX_STRING_LENGTH},
  value::DefaultValue,
};

/// Tables the store keeps its own metadata in.
pub const RESERVED_TABLES: &[&str] = &[
  "entity_definitions",
  "field_metadata",
  "entity_interfaces",
  "sub_entity_definitions",
  "ddl_scripts",
];

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
  pub property_path: String,
  pub message:       String,
}

impl std::fmt::Display for ValidationError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.property_path, self.message)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
  pub errors: Vec<ValidationError>,
}

impl ValidationResult {
  pub fn is_valid(&self) -> bool { self.errors.is_empty() }

  pub fn at(&self, path: &str) -> Option<&ValidationError> {
    self.errors.iter().find(|e| e.property_path == path)
  }

  fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
    self.errors.push(ValidationError {
      property_path: path.into(),
      message:       message.into(),
    });
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Another stored definition, as far as validation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDefinition {
  pub id:          Uuid,
  pub namespace:   String,
  pub entity_name: String,
  pub is_enabled:  bool,
  /// Root table and sub-entity tables.
  pub tables:      Vec<String>,
}

impl From<&EntityDefinition> for KnownDefinition {
  fn from(d: &EntityDefinition) -> Self {
    let root = d.table_name();
    let subs = d.sub_entities.iter().map(|s| s.table_name(&root));
    Self {
      id:          d.id,
      namespace:   d.namespace.clone(),
      entity_name: d.entity_name.clone(),
      is_enabled:  d.is_enabled,
      tables:      std::iter::once(root.clone()).chain(subs).collect(),
    }
  }
}

pub struct ValidationContext<'a> {
  /// The stored version of the candidate, if any.
  pub existing: Option<&'a EntityDefinition>,
  /// Every other stored definition.
  pub others:   &'a [KnownDefinition],
}

impl ValidationContext<'_> {
  fn other(&self, id: Uuid) -> Option<&KnownDefinition> {
    self.others.iter().find(|o| o.id == id)
  }
}

// ─── Name rules ──────────────────────────────────────────────────────────────

/// ASCII letter or `_`, then letters, digits and `_`.
pub fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sub-entity codes: uppercase letter, then letters and digits.
pub fn is_code(s: &str) -> bool {
  let mut chars = s.chars();
  chars.next().is_some_and(|c| c.is_ascii_uppercase()) && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Lower-kebab route slugs.
pub fn is_slug(s: &str) -> bool {
  !s.is_empty()
    && !s.starts_with('-')
    && !s.ends_with('-')
    && !s.contains("--")
    && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_reserved_table(table: &str) -> bool {
  let lower = table.to_ascii_lowercase();
  lower.starts_with("sqlite_")
    || lower.ends_with(crate::ddl::WIDEN_SUFFIX)
    || RESERVED_TABLES.contains(&lower.as_str())
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub fn validate_definition(
  candidate: &EntityDefinition,
  ctx: &ValidationContext<'_>,
) -> ValidationResult {
  let mut result = ValidationResult::default();

  root_attributes(candidate, ctx, &mut result);
  parent_link(candidate, ctx, &mut result);

  let mut root_reserved = vec![PRIMARY_KEY.to_owned()];
  if let Some(parent) = &candidate.parent {
    root_reserved.push(parent.foreign_key_field.clone());
  }
  owned_fields(candidate, None, &candidate.fields, &root_reserved, ctx, &mut result);

  interfaces(candidate, &mut result);
  sub_entities(candidate, ctx, &mut result);

  if let Some(existing) = ctx.existing {
    protected_fields(existing, candidate, &mut result);
    if existing.is_locked {
      lock_rules(existing, candidate, &mut result);
    }
  }

  result
}

// ─── Root ────────────────────────────────────────────────────────────────────

fn root_attributes(d: &EntityDefinition, ctx: &ValidationContext<'_>, r: &mut ValidationResult) {
  if d.namespace.trim().is_empty() {
    r.push("Namespace", "namespace is required");
  } else if !d.namespace.split('.').all(is_identifier) {
    r.push("Namespace", "namespace must be dot-separated identifiers");
  }

  if d.entity_name.trim().is_empty() {
    r.push("EntityName", "entity name is required");
  } else if !is_identifier(&d.entity_name) || d.entity_name.starts_with('_') {
    r.push("EntityName", "entity name must start with a letter and contain only letters, digits and '_'");
  }

  if !is_slug(&d.route) {
    r.push("Route", "route must be lower-case letters, digits and single hyphens");
  }

  if d.display_name.is_blank() {
    r.push("DisplayName", "display name is required in at least one locale");
  }

  if let Some(clash) = ctx.others.iter().find(|o| {
    o.namespace.eq_ignore_ascii_case(&d.namespace) && o.entity_name.eq_ignore_ascii_case(&d.entity_name)
  }) {
    r.push(
      "EntityName",
      format!("{}.{} is already defined", clash.namespace, clash.entity_name),
    );
  }

  let root = d.table_name();
  let tables = std::iter::once((root.clone(), "EntityName".to_owned())).chain(
    d.sub_entities
      .iter()
      .map(|s| (s.table_name(&root), format!("SubEntities.{}", s.code))),
  );
  for (table, path) in tables {
    if is_reserved_table(&table) {
      r.push(path, format!("table name {table} is reserved"));
    } else if let Some(owner) = ctx
      .others
      .iter()
      .find(|o| o.tables.iter().any(|t| t.eq_ignore_ascii_case(&table)))
    {
      r.push(
        path,
        format!("table {table} is already used by {}.{}", owner.namespace, owner.entity_name),
      );
    }
  }
}

fn parent_link(d: &EntityDefinition, ctx: &ValidationContext<'_>, r: &mut ValidationResult) {
  let Some(parent) = &d.parent else { return };
  if parent.parent_definition_id == d.id {
    r.push("Parent", "a definition cannot be its own parent");
  } else if ctx.other(parent.parent_definition_id).is_none() {
    r.push(
      "Parent",
      format!("parent definition {} does not exist", parent.parent_definition_id),
    );
  }
  if !is_identifier(&parent.foreign_key_field) {
    r.push("Parent", "parent foreign key must be an identifier");
  } else if d.field(&parent.foreign_key_field).is_some() {
    r.push(
      "Parent",
      format!("parent foreign key {} clashes with a field", parent.foreign_key_field),
    );
  }
  if !is_identifier(&parent.collection_name) {
    r.push("Parent", "parent collection name must be an identifier");
  }
}

// ─── Fields ──────────────────────────────────────────────────────────────────

fn path(owner: Option<&str>, name: &str) -> String {
  match owner {
    Some(code) => format!("{code}.{name}"),
    None => name.to_owned(),
  }
}

fn owned_fields(
  d: &EntityDefinition,
  owner: Option<&str>,
  fields: &[FieldMetadata],
  reserved: &[String],
  ctx: &ValidationContext<'_>,
  r: &mut ValidationResult,
) {
  let mut seen = HashSet::new();
  let active: Vec<&FieldMetadata> = fields.iter().filter(|f| !f.is_deleted).collect();

  for (i, f) in active.iter().enumerate() {
    let name = f.property_name.as_str();
    let p = if name.is_empty() {
      path(owner, &format!("Fields[{i}]"))
    } else {
      path(owner, name)
    };

    if !is_identifier(name) {
      r.push(&p, "property name must be an identifier");
      continue;
    }
    if !seen.insert(name.to_ascii_lowercase()) {
      r.push(&p, format!("duplicate property name {name}"));
    }
    let is_own_key = owner.is_none()
      && f.source == FieldSource::System
      && name.eq_ignore_ascii_case(PRIMARY_KEY);
    if !is_own_key && reserved.iter().any(|res| res.eq_ignore_ascii_case(name)) {
      r.push(&p, format!("{name} is reserved"));
    }

    let Some(field_type) = f.field_type() else {
      r.push(&p, format!("unknown data type {:?}", f.data_type));
      continue;
    };

    match field_type {
      FieldType::String => {
        if let Some(length) = f.length
          && (length == 0 || length > MAX_STRING_LENGTH)
        {
          r.push(&p, format!("length must be between 1 and {MAX_STRING_LENGTH}"));
        }
      }
      FieldType::Decimal => {
        let precision = f.effective_precision();
        if precision == 0 || precision > MAX_DECIMAL_PRECISION {
          r.push(&p, format!("precision must be between 1 and {MAX_DECIMAL_PRECISION}"));
        } else if f.effective_scale() > precision {
          r.push(&p, "scale cannot exceed precision");
        }
      }
      _ => {}
    }

    if f.is_entity_ref != (field_type == FieldType::EntityRef) {
      r.push(&p, "entity references must use the EntityRef data type");
    }
    if field_type == FieldType::EntityRef {
      match f.referenced_entity_id {
        None => r.push(&p, "referenced entity is required"),
        Some(id) if id == d.id => {}
        Some(id) => match ctx.other(id) {
          None => r.push(&p, format!("referenced entity {id} does not exist")),
          Some(o) if !o.is_enabled => {
            r.push(&p, format!("referenced entity {}.{} is disabled", o.namespace, o.entity_name))
          }
          Some(_) => {}
        },
      }
      if f.on_delete == CascadeBehavior::SetNull && f.is_required {
        r.push(&p, "a required reference cannot use SET NULL on delete");
      }
    }

    if let Some(raw) = &f.default_value
      && let Err(message) = DefaultValue::parse(field_type, raw)
    {
      r.push(&p, format!("invalid default value: {message}"));
    }

    if let Some(raw) = &f.validation_rules
      && let Err(message) = FieldRules::parse(raw)
    {
      r.push(&p, format!("invalid validation rules: {message}"));
    }

    if let Some(parent_id) = f.parent_field_id {
      parent_field(f, parent_id, &active, &p, r);
    }
  }
}

/// The parent field must be a sibling and the chain must not loop.
fn parent_field(
  f: &FieldMetadata,
  parent_id: Uuid,
  siblings: &[&FieldMetadata],
  p: &str,
  r: &mut ValidationResult,
) {
  let mut visited = vec![f.id];
  let mut current = Some(parent_id);
  while let Some(id) = current {
    if visited.contains(&id) {
      r.push(p, "parent field chain forms a cycle");
      return;
    }
    let Some(parent) = siblings.iter().find(|s| s.id == id) else {
      r.push(p, format!("parent field {id} does not exist"));
      return;
    };
    visited.push(id);
    current = parent.parent_field_id;
  }
}

// ─── Interfaces and sub-entities ─────────────────────────────────────────────

fn interfaces(d: &EntityDefinition, r: &mut ValidationResult) {
  let mut seen = HashSet::new();
  for i in &d.interfaces {
    if !seen.insert(i.kind) {
      r.push(format!("Interfaces.{}", i.kind), "interface listed twice");
    }
  }
}

fn sub_entities(d: &EntityDefinition, ctx: &ValidationContext<'_>, r: &mut ValidationResult) {
  if !d.sub_entities.is_empty() && d.structure != StructureType::MasterDetail {
    r.push("Structure", "sub-entities require the master-detail structure");
  }

  let mut codes = HashSet::new();
  for sub in &d.sub_entities {
    let p = format!("SubEntities.{}", sub.code);
    if !is_code(&sub.code) {
      r.push(&p, "code must start with an upper-case letter and contain only letters and digits");
      continue;
    }
    if !codes.insert(sub.code.to_ascii_lowercase()) {
      r.push(&p, format!("duplicate sub-entity code {}", sub.code));
    }

    let foreign_key = sub.foreign_key(&d.entity_name);
    if !is_identifier(&foreign_key) {
      r.push(&p, "foreign key field must be an identifier");
    }
    let collection = sub.collection();
    if !is_identifier(collection) {
      r.push(&p, "collection name must be an identifier");
    } else if d.field(collection).is_some() {
      r.push(&p, format!("collection {collection} clashes with a field"));
    }

    if let Some(sort) = &sub.default_sort_field
      && !sort_target_exists(sub, sort, &foreign_key)
    {
      r.push(&p, format!("default sort field {sort} does not exist"));
    }

    let reserved = [PRIMARY_KEY.to_owned(), foreign_key];
    owned_fields(d, Some(&sub.code), &sub.fields, &reserved, ctx, r);
  }
}

fn sort_target_exists(sub: &SubEntityDefinition, sort: &str, foreign_key: &str) -> bool {
  sort.eq_ignore_ascii_case(PRIMARY_KEY)
    || sort.eq_ignore_ascii_case(foreign_key)
    || sub.active_fields().any(|f| f.property_name.eq_ignore_ascii_case(sort))
}

// ─── Against the stored version ──────────────────────────────────────────────

fn protected_fields(existing: &EntityDefinition, candidate: &EntityDefinition, r: &mut ValidationResult) {
  for old in existing.active_fields().filter(|f| f.source.is_protected()) {
    let kept = candidate
      .field_by_id(old.id)
      .is_some_and(|f| !f.is_deleted);
    if kept {
      continue;
    }
    match old.source {
      FieldSource::System => r.push(&old.property_name, "system fields cannot be deleted"),
      FieldSource::Interface => {
        if let Some(i) = candidate
          .interfaces
          .iter()
          .find(|i| i.is_enabled && i.kind.provides(&old.property_name))
        {
          r.push(
            &old.property_name,
            format!("provided by the {} interface; disable the interface instead", i.kind),
          );
        }
      }
      FieldSource::Custom => {}
    }
  }
}

fn lock_rules(existing: &EntityDefinition, candidate: &EntityDefinition, r: &mut ValidationResult) {
  const LOCKED: &str = "cannot change once the entity is published";
  if existing.namespace != candidate.namespace {
    r.push("Namespace", LOCKED);
  }
  if existing.entity_name != candidate.entity_name {
    r.push("EntityName", LOCKED);
  }
  if existing.route != candidate.route {
    r.push("Route", LOCKED);
  }
  if existing.parent != candidate.parent {
    r.push("Parent", LOCKED);
  }

  published_fields(None, &existing.fields, &candidate.fields, r);

  for old in existing.interfaces.iter().filter(|i| i.is_locked) {
    let kept = candidate
      .interface(old.kind)
      .is_some_and(|i| i.is_enabled);
    if !kept {
      r.push(
        format!("Interfaces.{}", old.kind),
        "a locked interface cannot be removed or disabled",
      );
    }
  }

  for old in existing
    .sub_entities
    .iter()
    .filter(|s| s.published_revision.is_some())
  {
    let p = format!("SubEntities.{}", old.code);
    match candidate.sub_entities.iter().find(|s| s.id == old.id) {
      None => r.push(p, "a published sub-entity cannot be removed"),
      Some(new) if new.code != old.code => r.push(p, "a published sub-entity cannot be renamed"),
      Some(new) => {
        if new.foreign_key(&candidate.entity_name) != old.foreign_key(&existing.entity_name) {
          r.push(&p, "the foreign key of a published sub-entity cannot change");
        }
        published_fields(Some(&old.code), &old.fields, &new.fields, r);
      }
    }
  }
}

fn published_fields(
  owner: Option<&str>,
  existing: &[FieldMetadata],
  candidate: &[FieldMetadata],
  r: &mut ValidationResult,
) {
  for old in existing
    .iter()
    .filter(|f| !f.is_deleted && f.published_revision.is_some())
  {
    let p = path(owner, &old.property_name);
    let Some(new) = candidate.iter().find(|f| f.id == old.id && !f.is_deleted) else {
      r.push(p, "a published field cannot be deleted");
      continue;
    };
    if !new.property_name.eq_ignore_ascii_case(&old.property_name) {
      r.push(&p, format!("a published field cannot be renamed to {}", new.property_name));
    }

    let (Some(old_type), Some(new_type)) = (old.field_type(), new.field_type()) else {
      if !old.data_type.eq_ignore_ascii_case(&new.data_type) {
        r.push(&p, format!("cannot change data type from {} to {}", old.data_type, new.data_type));
      }
      continue;
    };
    if old_type != new_type {
      r.push(&p, format!("cannot change data type from {old_type} to {new_type}"));
      continue;
    }

    match old_type {
      FieldType::String => {
        let narrowed = match (old.length, new.length) {
          (Some(o), Some(n)) => n < o,
          (None, Some(_)) => true,
          _ => false,
        };
        if narrowed {
          r.push(
            &p,
            format!(
              "cannot decrease length from {} to {}",
              old.length.map_or("unbounded".to_owned(), |l| l.to_string()),
              new.length.map_or("unbounded".to_owned(), |l| l.to_string()),
            ),
          );
        }
      }
      FieldType::Decimal => {
        let (op, os) = (old.effective_precision(), old.effective_scale());
        let (np, ns) = (new.effective_precision(), new.effective_scale());
        if ns < os || np.saturating_sub(ns) < op.saturating_sub(os) {
          r.push(
            &p,
            format!("cannot decrease precision or scale from ({op},{os}) to ({np},{ns})"),
          );
        }
      }
      _ => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    definition::{EntityInterface, ParentLink},
    interface::InterfaceKind,
  };

  fn product() -> EntityDefinition {
    EntityDefinition::new("Catalog", "Product")
      .with_field(FieldMetadata::new(PRIMARY_KEY, FieldType::Long).source(FieldSource::System))
      .with_field(FieldMetadata::string("Code", 64).required())
      .with_field(FieldMetadata::string("Name", 200).required())
  }

  fn check(d: &EntityDefinition) -> ValidationResult {
    validate_definition(d, &ValidationContext {
      existing: None,
      others:   &[],
    })
  }

  /// A published, locked copy of `d`.
  fn published(d: &EntityDefinition) -> EntityDefinition {
    let mut p = d.clone();
    p.is_locked = true;
    p.revision = 1;
    for f in &mut p.fields {
      f.published_revision = Some(1);
    }
    for i in &mut p.interfaces {
      i.is_locked = true;
    }
    p
  }

  fn check_against(candidate: &EntityDefinition, existing: &EntityDefinition) -> ValidationResult {
    validate_definition(candidate, &ValidationContext {
      existing: Some(existing),
      others:   &[],
    })
  }

  #[test]
  fn valid_definition_passes() {
    let r = check(&product());
    assert!(r.is_valid(), "{:?}", r.errors);
  }

  #[test]
  fn names_are_checked() {
    let mut d = product();
    d.namespace = "Bad Namespace".into();
    d.entity_name = "9Lives".into();
    d.route = "Bad_Route".into();
    d.display_name = Default::default();
    let r = check(&d);
    for path in ["Namespace", "EntityName", "Route", "DisplayName"] {
      assert!(r.at(path).is_some(), "missing {path}: {:?}", r.errors);
    }
  }

  #[test]
  fn duplicate_names_ignore_case() {
    let d = product().with_field(FieldMetadata::string("code", 10));
    let r = check(&d);
    assert!(r.at("code").unwrap().message.contains("duplicate"));
  }

  #[test]
  fn type_limits() {
    let d = product()
      .with_field(FieldMetadata::string("Huge", 5000))
      .with_field(FieldMetadata::decimal("Price", 20, 2))
      .with_field(FieldMetadata::decimal("Ratio", 4, 6));
    let mut bad = FieldMetadata::string("Weird", 10);
    bad.data_type = "Money".into();
    let d = d.with_field(bad);
    let r = check(&d);
    assert!(r.at("Huge").is_some());
    assert!(r.at("Price").is_some());
    assert!(r.at("Ratio").is_some());
    assert!(r.at("Weird").unwrap().message.contains("unknown data type"));
  }

  #[test]
  fn id_is_reserved_for_the_system_field() {
    let mut d = product();
    d.fields[0].source = FieldSource::Custom;
    assert!(check(&d).at("Id").is_some());
  }

  #[test]
  fn references_must_resolve_to_enabled_definitions() {
    let category = EntityDefinition::new("Catalog", "Category");
    let mut disabled = EntityDefinition::new("Catalog", "Legacy");
    disabled.is_enabled = false;
    let others = [KnownDefinition::from(&category), KnownDefinition::from(&disabled)];

    let d = product()
      .with_field(FieldMetadata::reference("Category", category.id))
      .with_field(FieldMetadata::reference("Legacy", disabled.id))
      .with_field(FieldMetadata::reference("Missing", Uuid::new_v4()));
    let r = validate_definition(&d, &ValidationContext {
      existing: None,
      others:   &others,
    });
    assert!(r.at("Category").is_none());
    assert!(r.at("Legacy").unwrap().message.contains("disabled"));
    assert!(r.at("Missing").unwrap().message.contains("does not exist"));
  }

  #[test]
  fn uniqueness_against_other_definitions() {
    let clash = EntityDefinition::new("Catalog", "Product");
    let other_ns = EntityDefinition::new("Legacy", "Product");
    let r = validate_definition(&product(), &ValidationContext {
      existing: None,
      others:   &[KnownDefinition::from(&clash)],
    });
    assert!(r.at("EntityName").unwrap().message.contains("already defined"));

    let r = validate_definition(&product(), &ValidationContext {
      existing: None,
      others:   &[KnownDefinition::from(&other_ns)],
    });
    assert!(r.at("EntityName").unwrap().message.contains("Products"));
  }

  #[test]
  fn reserved_table_names() {
    let mut d = product();
    d.entity_name = "ddl_script".into();
    d.route = "ddl-script".into();
    assert!(check(&d).at("EntityName").unwrap().message.contains("reserved"));
  }

  #[test]
  fn defaults_and_rules_are_parsed() {
    let d = product()
      .with_field(FieldMetadata::new("Stock", FieldType::Integer).default_value("lots"))
      .with_field(FieldMetadata::string("Sku", 10).rules(serde_json::json!({"pattern": "("})));
    let r = check(&d);
    assert!(r.at("Stock").unwrap().message.contains("default"));
    assert!(r.at("Sku").unwrap().message.contains("rules"));
  }

  #[test]
  fn sub_entity_rules() {
    let d = product()
      .with_sub_entity(SubEntityDefinition::new("lines"))
      .with_sub_entity(
        SubEntityDefinition::new("Notes").with_field(FieldMetadata::new("ProductId", FieldType::Long)),
      );
    let r = check(&d);
    assert!(r.at("SubEntities.lines").is_some());
    assert!(r.at("Notes.ProductId").unwrap().message.contains("reserved"));

    let mut single = product();
    single.sub_entities.push(SubEntityDefinition::new("Lines"));
    assert!(check(&single).at("Structure").is_some());
  }

  #[test]
  fn parent_field_cycles_are_rejected() {
    let mut a = FieldMetadata::string("A", 10);
    let mut b = FieldMetadata::string("B", 10);
    a.parent_field_id = Some(b.id);
    b.parent_field_id = Some(a.id);
    let d = product().with_field(a).with_field(b);
    assert!(check(&d).at("A").unwrap().message.contains("cycle"));
  }

  #[test]
  fn parent_link_must_resolve() {
    let mut d = product();
    d.parent = Some(ParentLink {
      parent_definition_id: Uuid::new_v4(),
      foreign_key_field:    "OrderId".into(),
      collection_name:      "Products".into(),
      cascade:              CascadeBehavior::Cascade,
    });
    assert!(check(&d).at("Parent").is_some());
  }

  // ── Lock rules ──

  #[test]
  fn locked_definition_rejects_field_deletion() {
    let existing = published(&product());
    let mut candidate = existing.clone();
    candidate.fields.retain(|f| f.property_name != "Code");
    let r = check_against(&candidate, &existing);
    assert_eq!(r.errors.len(), 1, "{:?}", r.errors);
    assert_eq!(r.errors[0].property_path, "Code");
  }

  #[test]
  fn locked_definition_rejects_soft_deleting_a_published_field() {
    let existing = published(&product());
    let mut candidate = existing.clone();
    candidate.fields[1].is_deleted = true;
    assert!(check_against(&candidate, &existing).at("Code").is_some());
  }

  #[test]
  fn locked_definition_rejects_narrowing_and_type_changes() {
    let existing = published(&product().with_field(FieldMetadata::decimal("Price", 10, 2)));
    let mut candidate = existing.clone();
    candidate.fields[1].length = Some(32);
    candidate.fields[2].data_type = "Text".into();
    candidate.fields[3].scale = Some(1);
    let r = check_against(&candidate, &existing);
    assert!(r.at("Code").unwrap().message.contains("decrease length"));
    assert!(r.at("Name").unwrap().message.contains("data type"));
    assert!(r.at("Price").unwrap().message.contains("precision"));
  }

  #[test]
  fn locked_definition_accepts_additions_and_widening() {
    let existing = published(&product());
    let mut candidate = existing
      .clone()
      .with_field(FieldMetadata::decimal("Price", 10, 2));
    candidate.fields[2].length = Some(400);
    let r = check_against(&candidate, &existing);
    assert!(r.is_valid(), "{:?}", r.errors);
  }

  #[test]
  fn locked_definition_rejects_renames() {
    let existing = published(&product());
    let mut candidate = existing.clone();
    candidate.entity_name = "Item".into();
    candidate.namespace = "Shop".into();
    let r = check_against(&candidate, &existing);
    assert!(r.at("EntityName").is_some());
    assert!(r.at("Namespace").is_some());
  }

  #[test]
  fn locked_interfaces_cannot_be_removed() {
    let existing = published(&product().with_interface(InterfaceKind::Audit));
    let mut candidate = existing.clone();
    candidate.interfaces[0].is_enabled = false;
    let r = check_against(&candidate, &existing);
    assert!(r.at("Interfaces.Audit").is_some());

    let mut unlocked = existing.clone();
    unlocked.interfaces = vec![EntityInterface::new(InterfaceKind::Audit)];
    unlocked.interfaces[0].is_locked = false;
    unlocked.is_locked = false;
    let mut candidate = unlocked.clone();
    candidate.interfaces.clear();
    assert!(check_against(&candidate, &unlocked).is_valid());
  }

  #[test]
  fn system_fields_cannot_be_deleted_even_in_draft() {
    let existing = product();
    let mut candidate = existing.clone();
    candidate.fields.remove(0);
    assert!(check_against(&candidate, &existing).at("Id").is_some());
  }

  #[test]
  fn unpublished_fields_of_a_locked_definition_may_be_removed() {
    let existing = published(&product()).with_field(FieldMetadata::string("Draft", 10));
    let mut candidate = existing.clone();
    candidate.fields.pop();
    assert!(check_against(&candidate, &existing).is_valid());
  }
}
