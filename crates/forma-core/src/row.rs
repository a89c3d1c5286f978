//! Rows as stores see them and records as callers see them.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::value::Value;

/// One table row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Column/value pairs to write.
pub type Assignments = Vec<(String, Value)>;

/// Child rows written with their parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRows {
  pub table:       String,
  pub foreign_key: String,
  pub rows:        Vec<Assignments>,
}

/// Guard for optimistic concurrency: the row must still carry `expected` in
/// `column`, which the update then increments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGuard {
  pub column:   String,
  pub expected: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowInsert {
  pub values:   Assignments,
  pub children: Vec<ChildRows>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
  pub id:         i64,
  pub values:     Assignments,
  pub guard:      Option<VersionGuard>,
  /// Extra conditions the row must satisfy, e.g. not soft-deleted.
  pub conditions: Vec<crate::query::Condition>,
  /// Replaces the existing children of each listed table.
  pub children:   Vec<ChildRows>,
}

/// A record returned by the persistence engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
  pub fields:      Row,
  pub collections: BTreeMap<String, Vec<Record>>,
}

impl Record {
  pub fn from_row(fields: Row) -> Self {
    Self {
      fields,
      collections: BTreeMap::new(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.fields.get(name).or_else(|| {
      self
        .fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
    })
  }

  pub fn id(&self) -> Option<i64> { self.get(crate::compile::PRIMARY_KEY)?.as_i64() }

  pub fn to_json(&self) -> serde_json::Value {
    let mut map: serde_json::Map<String, serde_json::Value> = self
      .fields
      .iter()
      .map(|(k, v)| (k.clone(), v.to_json()))
      .collect();
    for (name, rows) in &self.collections {
      map.insert(name.clone(), rows.iter().map(Record::to_json).collect());
    }
    serde_json::Value::Object(map)
  }
}

impl Serialize for Record {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len() + self.collections.len()))?;
    for (k, v) in &self.fields {
      map.serialize_entry(k, v)?;
    }
    for (k, rows) in &self.collections {
      map.serialize_entry(k, rows)?;
    }
    map.end()
  }
}
