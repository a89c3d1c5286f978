//! Query options as callers send them, and the resolved form stores execute.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{field::FieldType, value::Value};

// ─── Caller-facing ───────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum FilterOp {
  #[default]
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  Contains,
  StartsWith,
  IsNull,
  IsNotNull,
}

impl FilterOp {
  /// Operators that ignore their operand.
  pub fn is_unary(self) -> bool { matches!(self, Self::IsNull | Self::IsNotNull) }

  /// Operators that only make sense on text.
  pub fn is_textual(self) -> bool { matches!(self, Self::Contains | Self::StartsWith) }
}

/// `(field, op, value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
  pub field: String,
  #[serde(default)]
  pub op:    FilterOp,
  #[serde(default)]
  pub value: serde_json::Value,
}

impl Filter {
  pub fn new(field: impl Into<String>, op: FilterOp, value: serde_json::Value) -> Self {
    Self {
      field: field.into(),
      op,
      value,
    }
  }

  pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    Self::new(field, FilterOp::Eq, value.into())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
  #[serde(default)]
  pub filters:             Vec<Filter>,
  #[serde(default)]
  pub order_by:            Option<String>,
  #[serde(default)]
  pub order_by_descending: bool,
  #[serde(default)]
  pub skip:                Option<u64>,
  #[serde(default)]
  pub take:                Option<u64>,
}

impl QueryOptions {
  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }
}

// ─── Store-facing ────────────────────────────────────────────────────────────

/// A column to read and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
  pub name:       String,
  pub field_type: FieldType,
  pub scale:      Option<u32>,
}

/// A resolved filter: canonical column name and a typed operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  pub column: String,
  pub op:     FilterOp,
  pub value:  Value,
}

impl Condition {
  pub fn eq(column: impl Into<String>, value: Value) -> Self {
    Self {
      column: column.into(),
      op: FilterOp::Eq,
      value,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
  pub column:     String,
  pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectSpec {
  /// `None` reads every column and decodes by storage class.
  pub columns:    Option<Vec<ColumnSpec>>,
  pub conditions: Vec<Condition>,
  pub order_by:   Option<OrderBy>,
  pub skip:       u64,
  pub take:       u64,
}

/// A column as reported by the live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
  pub name:          String,
  pub declared_type: String,
  pub not_null:      bool,
  pub primary_key:   bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn options_deserialize_with_defaults() {
    let o: QueryOptions = serde_json::from_str(
      r#"{"filters":[{"field":"Code","value":"P1"},{"field":"Name","op":"startsWith","value":"Wid"}],
          "orderBy":"Name","take":5}"#,
    )
    .unwrap();
    assert_eq!(o.filters[0].op, FilterOp::Eq);
    assert_eq!(o.filters[1].op, FilterOp::StartsWith);
    assert_eq!(o.order_by.as_deref(), Some("Name"));
    assert!(!o.order_by_descending);
    assert_eq!(o.take, Some(5));
    assert_eq!(o.skip, None);
  }

  #[test]
  fn op_names_parse() {
    assert_eq!("gte".parse::<FilterOp>().unwrap(), FilterOp::Gte);
    assert_eq!("isNotNull".parse::<FilterOp>().unwrap(), FilterOp::IsNotNull);
    assert_eq!(FilterOp::StartsWith.to_string(), "startsWith");
  }
}
