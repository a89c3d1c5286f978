//! Physical schema snapshots and change analysis.
//!
//! After every successful publish the definition records an
//! [`AppliedSchema`]: the tables and columns that now exist. The next publish
//! diffs the compiled target shape against that snapshot.

use serde::{Deserialize, Serialize};

use crate::{
  compile::{CompiledField, CompiledTypeDescriptor},
  field::FieldType,
};

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedColumn {
  pub name:       String,
  pub field_type: FieldType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub length:     Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub precision:  Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scale:      Option<u32>,
  /// Whether the physical column carries `NOT NULL`. Columns added to a
  /// table that already held rows may be required yet nullable.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub not_null:   bool,
}

impl AppliedColumn {
  /// The column as `CREATE TABLE` declares it.
  pub fn of(field: &CompiledField) -> Self {
    Self {
      name:       field.name.clone(),
      field_type: field.field_type,
      length:     field.length,
      precision:  field.precision,
      scale:      field.scale,
      not_null:   field.primary_key || field.required,
    }
  }

  /// Column type as shown in change reports.
  pub fn describe(&self) -> String {
    match (self.field_type, self.length, self.precision, self.scale) {
      (FieldType::String, Some(n), ..) => format!("String({n})"),
      (FieldType::Decimal, _, Some(p), Some(s)) => format!("Decimal({p},{s})"),
      (t, ..) => t.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTable {
  pub name:    String,
  pub columns: Vec<AppliedColumn>,
}

impl AppliedTable {
  pub fn column(&self, name: &str) -> Option<&AppliedColumn> {
    self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedSchema {
  pub tables: Vec<AppliedTable>,
}

impl AppliedSchema {
  /// The full target shape of a descriptor: root table then collection
  /// tables, every column whether or not it is live yet.
  pub fn target(descriptor: &CompiledTypeDescriptor) -> Self {
    let root = AppliedTable {
      name:    descriptor.table_name.clone(),
      columns: descriptor.fields.iter().map(AppliedColumn::of).collect(),
    };
    let children = descriptor.collections.iter().map(|c| AppliedTable {
      name:    c.table_name.clone(),
      columns: c.fields.iter().map(AppliedColumn::of).collect(),
    });
    Self {
      tables: std::iter::once(root).chain(children).collect(),
    }
  }

  /// The shape left behind by publishing `descriptor` on top of
  /// `previous`. Tables that already existed keep the nullability of their
  /// columns, and columns added to them are only `NOT NULL` when a literal
  /// default fills the existing rows.
  pub fn published(descriptor: &CompiledTypeDescriptor, previous: Option<&AppliedSchema>) -> Self {
    let mut schema = Self::target(descriptor);
    let Some(previous) = previous else {
      return schema;
    };
    let shapes = std::iter::once((descriptor.table_name.as_str(), descriptor.fields.as_slice())).chain(
      descriptor
        .collections
        .iter()
        .map(|c| (c.table_name.as_str(), c.fields.as_slice())),
    );
    for ((table, fields), applied) in shapes.zip(&mut schema.tables) {
      let Some(old) = previous.table(table) else {
        continue;
      };
      for (field, column) in fields.iter().zip(&mut applied.columns) {
        column.not_null = match old.column(&field.name) {
          Some(existing) => existing.not_null,
          None => crate::ddl::added_not_null(field),
        };
      }
    }
    schema
  }

  pub fn table(&self, name: &str) -> Option<&AppliedTable> {
    self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
  }
}

// ─── Change analysis ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
  pub table:  String,
  pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
  pub table: String,
  pub from:  AppliedColumn,
  pub to:    AppliedColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum DestructiveKind {
  TypeChanged { from: FieldType, to: FieldType },
  Narrowed { from: String, to: String },
  ColumnRemoved,
  TableRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestructiveChange {
  pub table:  String,
  pub column: Option<String>,
  #[serde(flatten)]
  pub kind:   DestructiveKind,
}

impl std::fmt::Display for DestructiveChange {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let target = match &self.column {
      Some(c) => format!("{}.{c}", self.table),
      None => self.table.clone(),
    };
    match &self.kind {
      DestructiveKind::TypeChanged { from, to } => {
        write!(f, "{target}: type changes from {from} to {to}")
      }
      DestructiveKind::Narrowed { from, to } => write!(f, "{target}: narrows from {from} to {to}"),
      DestructiveKind::ColumnRemoved => write!(f, "{target}: column removed"),
      DestructiveKind::TableRemoved => write!(f, "{target}: table removed"),
    }
  }
}

/// Difference between the applied schema and a target shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
  pub new_tables:  Vec<String>,
  pub new_columns: Vec<ColumnRef>,
  pub widened:     Vec<ColumnChange>,
  pub destructive: Vec<DestructiveChange>,
}

impl ChangeAnalysis {
  pub fn has_destructive_changes(&self) -> bool { !self.destructive.is_empty() }

  pub fn is_empty(&self) -> bool {
    self.new_tables.is_empty()
      && self.new_columns.is_empty()
      && self.widened.is_empty()
      && self.destructive.is_empty()
  }

  pub fn widens(&self, table: &str) -> bool {
    self.widened.iter().any(|w| w.table.eq_ignore_ascii_case(table))
  }

  pub fn is_new_table(&self, table: &str) -> bool {
    self.new_tables.iter().any(|t| t.eq_ignore_ascii_case(table))
  }

  pub fn is_new_column(&self, table: &str, column: &str) -> bool {
    self.new_columns.iter().any(|c| {
      c.table.eq_ignore_ascii_case(table) && c.column.eq_ignore_ascii_case(column)
    })
  }
}

/// Diff `target` against `applied`. Names compare case-insensitively, as
/// SQLite identifiers do.
pub fn analyze_changes(applied: &AppliedSchema, target: &AppliedSchema) -> ChangeAnalysis {
  let mut analysis = ChangeAnalysis::default();

  for table in &target.tables {
    let Some(existing) = applied.table(&table.name) else {
      analysis.new_tables.push(table.name.clone());
      continue;
    };
    for column in &table.columns {
      match existing.column(&column.name) {
        None => analysis.new_columns.push(ColumnRef {
          table:  table.name.clone(),
          column: column.name.clone(),
        }),
        Some(old) => compare_column(&table.name, old, column, &mut analysis),
      }
    }
    for old in &existing.columns {
      if table.column(&old.name).is_none() {
        analysis.destructive.push(DestructiveChange {
          table:  table.name.clone(),
          column: Some(old.name.clone()),
          kind:   DestructiveKind::ColumnRemoved,
        });
      }
    }
  }

  for old in &applied.tables {
    if target.table(&old.name).is_none() {
      analysis.destructive.push(DestructiveChange {
        table:  old.name.clone(),
        column: None,
        kind:   DestructiveKind::TableRemoved,
      });
    }
  }

  analysis
}

fn compare_column(
  table: &str,
  old: &AppliedColumn,
  new: &AppliedColumn,
  analysis: &mut ChangeAnalysis,
) {
  if old.field_type != new.field_type {
    analysis.destructive.push(DestructiveChange {
      table:  table.to_owned(),
      column: Some(new.name.clone()),
      kind:   DestructiveKind::TypeChanged {
        from: old.field_type,
        to:   new.field_type,
      },
    });
    return;
  }

  let direction = match new.field_type {
    // `None` is unbounded text.
    FieldType::String => match (old.length, new.length) {
      (Some(o), Some(n)) => o.cmp(&n),
      (Some(_), None) => std::cmp::Ordering::Less,
      (None, Some(_)) => std::cmp::Ordering::Greater,
      (None, None) => std::cmp::Ordering::Equal,
    },
    FieldType::Decimal => {
      let (op, os) = (old.precision.unwrap_or(0), old.scale.unwrap_or(0));
      let (np, ns) = (new.precision.unwrap_or(0), new.scale.unwrap_or(0));
      let (oi, ni) = (op.saturating_sub(os), np.saturating_sub(ns));
      if ns < os || ni < oi {
        std::cmp::Ordering::Greater
      } else if ns > os || ni > oi {
        std::cmp::Ordering::Less
      } else {
        std::cmp::Ordering::Equal
      }
    }
    _ => std::cmp::Ordering::Equal,
  };

  match direction {
    std::cmp::Ordering::Less => analysis.widened.push(ColumnChange {
      table: table.to_owned(),
      from:  old.clone(),
      to:    new.clone(),
    }),
    std::cmp::Ordering::Greater => analysis.destructive.push(DestructiveChange {
      table:  table.to_owned(),
      column: Some(new.name.clone()),
      kind:   DestructiveKind::Narrowed {
        from: old.describe(),
        to:   new.describe(),
      },
    }),
    std::cmp::Ordering::Equal => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn col(name: &str, field_type: FieldType, length: Option<u32>) -> AppliedColumn {
    AppliedColumn {
      name: name.into(),
      field_type,
      length,
      precision: None,
      scale: None,
      not_null: false,
    }
  }

  fn dec(name: &str, p: u32, s: u32) -> AppliedColumn {
    AppliedColumn {
      name:       name.into(),
      field_type: FieldType::Decimal,
      length:     None,
      precision:  Some(p),
      scale:      Some(s),
      not_null:   false,
    }
  }

  fn schema(tables: Vec<(&str, Vec<AppliedColumn>)>) -> AppliedSchema {
    AppliedSchema {
      tables: tables
        .into_iter()
        .map(|(name, columns)| AppliedTable {
          name: name.into(),
          columns,
        })
        .collect(),
    }
  }

  #[test]
  fn additive_changes_are_not_destructive() {
    let applied = schema(vec![(
      "Products",
      vec![col("Id", FieldType::Long, None), col("Name", FieldType::String, Some(200))],
    )]);
    let target = schema(vec![
      (
        "Products",
        vec![
          col("Id", FieldType::Long, None),
          col("Name", FieldType::String, Some(400)),
          dec("Price", 10, 2),
        ],
      ),
      ("Products_Lines", vec![col("Id", FieldType::Long, None)]),
    ]);
    let a = analyze_changes(&applied, &target);
    assert!(!a.has_destructive_changes());
    assert_eq!(a.new_tables, ["Products_Lines"]);
    assert_eq!(a.new_columns.len(), 1);
    assert_eq!(a.new_columns[0].column, "Price");
    assert_eq!(a.widened.len(), 1);
    assert!(a.widens("products"));
  }

  #[test]
  fn narrowing_type_change_and_removal_are_destructive() {
    let applied = schema(vec![
      (
        "Products",
        vec![
          col("Name", FieldType::String, Some(200)),
          col("Qty", FieldType::Integer, None),
          col("Gone", FieldType::Text, None),
          dec("Price", 10, 2),
        ],
      ),
      ("Products_Old", vec![]),
    ]);
    let target = schema(vec![(
      "Products",
      vec![
        col("Name", FieldType::String, Some(100)),
        col("Qty", FieldType::String, Some(10)),
        dec("Price", 10, 4),
      ],
    )]);
    let a = analyze_changes(&applied, &target);
    assert!(a.has_destructive_changes());
    let kinds: Vec<_> = a.destructive.iter().map(|d| d.kind.clone()).collect();
    assert!(kinds.contains(&DestructiveKind::Narrowed {
      from: "String(200)".into(),
      to:   "String(100)".into(),
    }));
    assert!(kinds.contains(&DestructiveKind::TypeChanged {
      from: FieldType::Integer,
      to:   FieldType::String,
    }));
    assert!(kinds.contains(&DestructiveKind::ColumnRemoved));
    assert!(kinds.contains(&DestructiveKind::TableRemoved));
    // 10,2 → 10,4 loses two integer digits.
    assert_eq!(a.destructive.len(), 5);
  }

  #[test]
  fn unbounded_text_counts_as_widest() {
    let applied = schema(vec![("T", vec![col("S", FieldType::String, Some(10))])]);
    let target = schema(vec![("T", vec![col("S", FieldType::String, None)])]);
    assert_eq!(analyze_changes(&applied, &target).widened.len(), 1);
    assert!(analyze_changes(&target, &applied).has_destructive_changes());
  }

  #[test]
  fn published_snapshot_tracks_physical_nullability() {
    use std::collections::HashMap;

    use crate::{compile::compile, definition::EntityDefinition, field::FieldMetadata};

    let def = EntityDefinition::new("Catalog", "Product")
      .with_field(FieldMetadata::string("Code", 64).required());
    let first = compile(&def, &HashMap::new()).unwrap();
    let created = AppliedSchema::published(&first, None);
    assert_eq!(created, AppliedSchema::target(&first));
    assert!(created.table("Products").unwrap().column("Code").unwrap().not_null);

    let def = def
      .with_field(FieldMetadata::string("Sku", 20).required())
      .with_field(FieldMetadata::new("Stock", FieldType::Integer).required().default_value("0"));
    let second = compile(&def, &HashMap::new()).unwrap();
    let altered = AppliedSchema::published(&second, Some(&created));
    let products = altered.table("Products").unwrap();
    assert!(products.column("Code").unwrap().not_null);
    assert!(!products.column("Sku").unwrap().not_null);
    assert!(products.column("Stock").unwrap().not_null);
    assert!(analyze_changes(&altered, &AppliedSchema::target(&second)).is_empty());
  }

  #[test]
  fn identical_shapes_produce_no_changes() {
    let s = schema(vec![("T", vec![col("Id", FieldType::Long, None)])]);
    assert!(analyze_changes(&s, &s).is_empty());
  }
}
