//! Field metadata and the closed set of field data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::definition::{CascadeBehavior, LocalizedText};

/// Largest `String` length a field may declare.
pub const MAX_STRING_LENGTH: u32 = 4000;
/// Largest decimal precision. Decimals live in NUMERIC columns, which keep
/// 15 significant digits exactly.
pub const MAX_DECIMAL_PRECISION: u32 = 15;
pub const DEFAULT_DECIMAL_PRECISION: u32 = 15;
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;
/// Storage length of `Enum` codes.
pub const ENUM_CODE_LENGTH: u32 = 100;

// ─── FieldType ───────────────────────────────────────────────────────────────

/// Storage type of a field. Parsed from the data-type code recorded on
/// [`FieldMetadata`].
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum FieldType {
  String,
  Text,
  #[strum(to_string = "Integer", serialize = "Int32")]
  #[serde(alias = "Int32")]
  Integer,
  #[strum(to_string = "Long", serialize = "Int64")]
  #[serde(alias = "Int64")]
  Long,
  Decimal,
  Boolean,
  DateTime,
  Date,
  Guid,
  EntityRef,
  Enum,
}

impl FieldType {
  /// Types whose values are compared as text.
  pub fn is_textual(self) -> bool {
    matches!(self, Self::String | Self::Text | Self::Enum)
  }
}

// ─── FieldSource ─────────────────────────────────────────────────────────────

/// Where a field came from. Only `Custom` fields may be removed by the
/// aggregate editor.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum FieldSource {
  System,
  Interface,
  #[default]
  Custom,
}

impl FieldSource {
  pub fn is_protected(self) -> bool { !matches!(self, Self::Custom) }
}

// ─── Validation rules ────────────────────────────────────────────────────────

/// The serialized rule set an operator may attach to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldRules {
  #[serde(default)]
  pub min:        Option<Decimal>,
  #[serde(default)]
  pub max:        Option<Decimal>,
  #[serde(default)]
  pub min_length: Option<usize>,
  #[serde(default)]
  pub max_length: Option<usize>,
  #[serde(default)]
  pub pattern:    Option<String>,
}

impl FieldRules {
  /// Parse and sanity-check a raw rule set.
  pub fn parse(raw: &serde_json::Value) -> Result<Self, String> {
    let rules: Self = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    if let (Some(min), Some(max)) = (rules.min, rules.max)
      && min > max
    {
      return Err(format!("min {min} is greater than max {max}"));
    }
    if let (Some(min), Some(max)) = (rules.min_length, rules.max_length)
      && min > max
    {
      return Err(format!("minLength {min} is greater than maxLength {max}"));
    }
    if let Some(pattern) = &rules.pattern {
      regex::Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    }
    Ok(rules)
  }
}

// ─── FieldMetadata ───────────────────────────────────────────────────────────

/// One field of a definition or sub-entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
  #[serde(default = "Uuid::new_v4")]
  pub id:                   Uuid,
  /// Owning field of a composite group.
  #[serde(default)]
  pub parent_field_id:      Option<Uuid>,
  pub property_name:        String,
  #[serde(default)]
  pub display_name:         LocalizedText,
  /// A [`FieldType`] code. Kept as text so unknown codes surface as
  /// validation or compile errors rather than deserialization failures.
  pub data_type:            String,
  #[serde(default)]
  pub length:               Option<u32>,
  #[serde(default)]
  pub precision:            Option<u32>,
  #[serde(default)]
  pub scale:                Option<u32>,
  #[serde(default)]
  pub is_required:          bool,
  #[serde(default)]
  pub is_entity_ref:        bool,
  #[serde(default)]
  pub referenced_entity_id: Option<Uuid>,
  #[serde(default)]
  pub on_delete:            CascadeBehavior,
  #[serde(default)]
  pub lookup_display_field: Option<String>,
  #[serde(default)]
  pub enum_code:            Option<String>,
  #[serde(default)]
  pub default_value:        Option<String>,
  #[serde(default)]
  pub validation_rules:     Option<serde_json::Value>,
  #[serde(default)]
  pub sort_order:           i32,
  #[serde(default)]
  pub source:               FieldSource,
  /// Revision of the definition in which this field's column was created.
  #[serde(default)]
  pub published_revision:   Option<u64>,
  #[serde(default)]
  pub is_deleted:           bool,
  #[serde(default)]
  pub deleted_at:           Option<DateTime<Utc>>,
  #[serde(default)]
  pub deleted_by:           Option<String>,
}

impl FieldMetadata {
  pub fn new(property_name: impl Into<String>, data_type: FieldType) -> Self {
    let property_name = property_name.into();
    Self {
      id:                   Uuid::new_v4(),
      parent_field_id:      None,
      display_name:         LocalizedText::new("en", property_name.clone()),
      property_name,
      data_type:            data_type.to_string(),
      length:               None,
      precision:            None,
      scale:                None,
      is_required:          false,
      is_entity_ref:        data_type == FieldType::EntityRef,
      referenced_entity_id: None,
      on_delete:            CascadeBehavior::Restrict,
      lookup_display_field: None,
      enum_code:            None,
      default_value:        None,
      validation_rules:     None,
      sort_order:           0,
      source:               FieldSource::Custom,
      published_revision:   None,
      is_deleted:           false,
      deleted_at:           None,
      deleted_by:           None,
    }
  }

  /// A `String` field of the given length.
  pub fn string(property_name: impl Into<String>, length: u32) -> Self {
    Self::new(property_name, FieldType::String).length(length)
  }

  pub fn decimal(property_name: impl Into<String>, precision: u32, scale: u32) -> Self {
    let mut field = Self::new(property_name, FieldType::Decimal);
    field.precision = Some(precision);
    field.scale = Some(scale);
    field
  }

  pub fn reference(property_name: impl Into<String>, target: Uuid) -> Self {
    let mut field = Self::new(property_name, FieldType::EntityRef);
    field.referenced_entity_id = Some(target);
    field
  }

  pub fn length(mut self, length: u32) -> Self {
    self.length = Some(length);
    self
  }

  pub fn required(mut self) -> Self {
    self.is_required = true;
    self
  }

  pub fn default_value(mut self, value: impl Into<String>) -> Self {
    self.default_value = Some(value.into());
    self
  }

  pub fn sort_order(mut self, order: i32) -> Self {
    self.sort_order = order;
    self
  }

  pub fn source(mut self, source: FieldSource) -> Self {
    self.source = source;
    self
  }

  pub fn rules(mut self, rules: serde_json::Value) -> Self {
    self.validation_rules = Some(rules);
    self
  }

  pub fn field_type(&self) -> Option<FieldType> { self.data_type.parse().ok() }

  pub fn effective_precision(&self) -> u32 {
    self.precision.unwrap_or(DEFAULT_DECIMAL_PRECISION)
  }

  pub fn effective_scale(&self) -> u32 { self.scale.unwrap_or(DEFAULT_DECIMAL_SCALE) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_codes_parse_case_insensitively() {
    assert_eq!("string".parse::<FieldType>().unwrap(), FieldType::String);
    assert_eq!("Int32".parse::<FieldType>().unwrap(), FieldType::Integer);
    assert_eq!("int64".parse::<FieldType>().unwrap(), FieldType::Long);
    assert_eq!("DateTime".parse::<FieldType>().unwrap(), FieldType::DateTime);
    assert!("Money".parse::<FieldType>().is_err());
    assert_eq!(FieldType::Integer.to_string(), "Integer");
  }

  #[test]
  fn rules_reject_unknown_keys_and_bad_patterns() {
    assert!(FieldRules::parse(&serde_json::json!({"min": 1, "max": 5})).is_ok());
    assert!(FieldRules::parse(&serde_json::json!({"minimum": 1})).is_err());
    assert!(FieldRules::parse(&serde_json::json!({"pattern": "("})).is_err());
    assert!(FieldRules::parse(&serde_json::json!({"min": 9, "max": 1})).is_err());
  }

  #[test]
  fn entity_ref_constructor_sets_flag() {
    let target = Uuid::new_v4();
    let f = FieldMetadata::reference("Category", target);
    assert!(f.is_entity_ref);
    assert_eq!(f.referenced_entity_id, Some(target));
    assert_eq!(f.field_type(), Some(FieldType::EntityRef));
  }
}
