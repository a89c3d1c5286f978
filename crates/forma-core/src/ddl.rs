//! SQLite DDL generation from compiled descriptors.
//!
//! | field type  | column                         |
//! |-------------|--------------------------------|
//! | `String`    | `VARCHAR(n)`, `TEXT` unbounded |
//! | `Text`      | `TEXT`                         |
//! | `Integer`   | `INTEGER`                      |
//! | `Long`      | `BIGINT`                       |
//! | `Decimal`   | `NUMERIC(p,s)`                 |
//! | `Boolean`   | `BOOLEAN` (0/1)                |
//! | `DateTime`  | `DATETIME` (RFC 3339 text)     |
//! | `Date`      | `DATE` (`YYYY-MM-DD`)          |
//! | `Guid`      | `CHAR(36)`                     |
//! | `EntityRef` | `INTEGER REFERENCES ...`       |
//! | `Enum`      | `VARCHAR(100)`                 |
//!
//! SQLite cannot alter a column in place, so widening a column rebuilds its
//! table: create `<table>__widen`, copy, drop, rename, recreate indexes. The
//! executor runs scripts with foreign-key enforcement suspended and checks
//! integrity before commit.

use crate::{
  collab::Localizer,
  compile::{CompiledField, CompiledTypeDescriptor},
  field::{ENUM_CODE_LENGTH, FieldType},
  schema::{AppliedSchema, ChangeAnalysis},
  value::{DefaultValue, Value, format_date, format_datetime},
};

/// Suffix of the scratch table used while widening.
pub const WIDEN_SUFFIX: &str = "__widen";

/// Quote an identifier.
pub fn quote(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

pub fn column_type(field: &CompiledField) -> String {
  match field.field_type {
    FieldType::String => match field.length {
      Some(n) => format!("VARCHAR({n})"),
      None => "TEXT".into(),
    },
    FieldType::Text => "TEXT".into(),
    FieldType::Integer | FieldType::EntityRef => "INTEGER".into(),
    FieldType::Long => "BIGINT".into(),
    FieldType::Decimal => format!(
      "NUMERIC({},{})",
      field.precision.unwrap_or(crate::field::DEFAULT_DECIMAL_PRECISION),
      field.scale.unwrap_or(crate::field::DEFAULT_DECIMAL_SCALE)
    ),
    FieldType::Boolean => "BOOLEAN".into(),
    FieldType::DateTime => "DATETIME".into(),
    FieldType::Date => "DATE".into(),
    FieldType::Guid => "CHAR(36)".into(),
    FieldType::Enum => format!("VARCHAR({ENUM_CODE_LENGTH})"),
  }
}

/// SQL literal for a value.
pub fn literal(value: &Value) -> String {
  let text = |s: &str| format!("'{}'", s.replace('\'', "''"));
  match value {
    Value::Null => "NULL".into(),
    Value::Bool(b) => if *b { "1" } else { "0" }.into(),
    Value::Integer(i) => i.to_string(),
    Value::Decimal(d) => d.to_string(),
    Value::Text(s) => text(s),
    Value::DateTime(dt) => text(&format_datetime(*dt)),
    Value::Date(d) => text(&format_date(*d)),
    Value::Guid(g) => text(&g.to_string()),
  }
}

fn literal_default(field: &CompiledField) -> Option<String> {
  match &field.default_value {
    Some(DefaultValue::Literal(v)) if !v.is_null() => Some(literal(v)),
    _ => None,
  }
}

/// Whether a required column added to a table that may already hold rows
/// can be declared `NOT NULL`: only when a literal default fills those rows.
pub fn added_not_null(field: &CompiledField) -> bool {
  field.required && literal_default(field).is_some()
}

fn column_definition(field: &CompiledField, not_null: bool) -> String {
  if field.primary_key {
    // Only the exact type name INTEGER makes the column the rowid alias.
    return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(&field.name));
  }
  let mut sql = format!("{} {}", quote(&field.name), column_type(field));
  if not_null {
    sql.push_str(" NOT NULL");
  }
  if let Some(default) = literal_default(field) {
    sql.push_str(" DEFAULT ");
    sql.push_str(&default);
  }
  if let Some(reference) = &field.reference {
    sql.push_str(&format!(
      " REFERENCES {}({}) ON DELETE {}",
      quote(&reference.target.table_name),
      quote(crate::compile::PRIMARY_KEY),
      reference.on_delete.sql()
    ));
  }
  sql
}

// ─── Script builder ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
  lines: Vec<String>,
}

impl Script {
  fn comment(&mut self, text: &str) {
    for line in text.lines() {
      self.lines.push(format!("-- {line}").trim_end().to_owned());
    }
  }

  fn statement(&mut self, sql: String) { self.lines.push(format!("{sql};")); }

  fn blank(&mut self) {
    if self.lines.last().is_some_and(|l| !l.is_empty()) {
      self.lines.push(String::new());
    }
  }

  fn finish(mut self) -> String {
    while self.lines.last().is_some_and(String::is_empty) {
      self.lines.pop();
    }
    let mut out = self.lines.join("\n");
    out.push('\n');
    out
  }
}

struct Labels<'a> {
  localizer: &'a dyn Localizer,
  locale:    &'a str,
}

impl Labels<'_> {
  fn table_header(&self, script: &mut Script, label: &str, table: &str, fields: &[CompiledField]) {
    script.comment(&format!("{label} ({table})"));
    for f in fields {
      let field_label = self.localizer.label(&f.display_name, self.locale, &f.name);
      if field_label != f.name {
        script.comment(&format!("  {}: {field_label}", f.name));
      }
    }
  }
}

fn create_table(
  script: &mut Script,
  table: &str,
  fields: &[CompiledField],
  not_null: &dyn Fn(&CompiledField) -> bool,
) {
  let columns: Vec<String> = fields
    .iter()
    .map(|f| format!("  {}", column_definition(f, not_null(f))))
    .collect();
  script.statement(format!("CREATE TABLE {} (\n{}\n)", quote(table), columns.join(",\n")));
}

fn index_statements(table: &str, field: &CompiledField) -> Option<String> {
  if field.primary_key {
    return None;
  }
  if field.unique {
    return Some(format!(
      "CREATE UNIQUE INDEX {} ON {} ({})",
      quote(&format!("UX_{table}_{}", field.name)),
      quote(table),
      quote(&field.name)
    ));
  }
  field.reference.as_ref().map(|_| {
    format!(
      "CREATE INDEX {} ON {} ({})",
      quote(&format!("IX_{table}_{}", field.name)),
      quote(table),
      quote(&field.name)
    )
  })
}

fn indexes(script: &mut Script, table: &str, fields: &[CompiledField]) {
  for sql in fields.iter().filter_map(|f| index_statements(table, f)) {
    script.statement(sql);
  }
}

/// Every table of the descriptor as (label, table, fields).
fn tables<'a>(
  d: &'a CompiledTypeDescriptor,
  labels: &Labels<'_>,
) -> Vec<(String, &'a str, &'a [CompiledField])> {
  let root_label = labels.localizer.label(&d.display_name, labels.locale, &d.entity_name);
  std::iter::once((
    format!("{root_label}: {}", d.full_type_name),
    d.table_name.as_str(),
    d.fields.as_slice(),
  ))
  .chain(d.collections.iter().map(|c| {
    let label = labels.localizer.label(&c.display_name, labels.locale, &c.code);
    (
      format!("{label}: {}.{}", d.full_type_name, c.name),
      c.table_name.as_str(),
      c.fields.as_slice(),
    )
  }))
  .collect()
}

// ─── Public generators ───────────────────────────────────────────────────────

/// `CREATE TABLE` for the root and every collection, plus indexes.
pub fn create_script(d: &CompiledTypeDescriptor, localizer: &dyn Localizer, locale: &str) -> String {
  let labels = Labels { localizer, locale };
  let mut script = Script::default();
  for (label, table, fields) in tables(d, &labels) {
    labels.table_header(&mut script, &label, table, fields);
    create_table(&mut script, table, fields, &|f| f.required);
    indexes(&mut script, table, fields);
    script.blank();
  }
  script.finish()
}

/// Incremental script for the additive part of `analysis`. Destructive
/// entries are listed as comments only; callers must not execute a script
/// for an analysis that has any.
pub fn alter_script(
  d: &CompiledTypeDescriptor,
  applied: &AppliedSchema,
  analysis: &ChangeAnalysis,
  localizer: &dyn Localizer,
  locale: &str,
) -> String {
  let labels = Labels { localizer, locale };
  let mut script = Script::default();

  for change in &analysis.destructive {
    script.comment(&format!("blocked destructive change: {change}"));
  }
  script.blank();

  for (label, table, fields) in tables(d, &labels) {
    if analysis.is_new_table(table) {
      labels.table_header(&mut script, &label, table, fields);
      create_table(&mut script, table, fields, &|f| f.required);
      indexes(&mut script, table, fields);
      script.blank();
    } else if analysis.widens(table) {
      rebuild_table(&mut script, table, fields, applied, analysis);
      script.blank();
    } else {
      let added: Vec<&CompiledField> = fields
        .iter()
        .filter(|f| analysis.is_new_column(table, &f.name))
        .collect();
      if added.is_empty() {
        continue;
      }
      script.comment(&format!("{label}: new columns"));
      for field in added {
        script.statement(format!(
          "ALTER TABLE {} ADD COLUMN {}",
          quote(table),
          column_definition(field, added_not_null(field))
        ));
        if let Some(sql) = index_statements(table, field) {
          script.statement(sql);
        }
      }
      script.blank();
    }
  }
  script.finish()
}

fn rebuild_table(
  script: &mut Script,
  table: &str,
  fields: &[CompiledField],
  applied: &AppliedSchema,
  analysis: &ChangeAnalysis,
) {
  for w in analysis.widened.iter().filter(|w| w.table.eq_ignore_ascii_case(table)) {
    script.comment(&format!(
      "widen {}.{}: {} -> {}",
      table,
      w.to.name,
      w.from.describe(),
      w.to.describe()
    ));
  }

  // The scratch table keeps each column's physical nullability; rows copied
  // from a column added nullable may hold NULLs.
  let existing = applied.table(table);
  let scratch = format!("{table}{WIDEN_SUFFIX}");
  create_table(script, &scratch, fields, &|f| {
    match existing.and_then(|t| t.column(&f.name)) {
      Some(column) => column.not_null,
      None => added_not_null(f),
    }
  });

  let copied: Vec<String> = fields
    .iter()
    .filter(|f| existing.is_some_and(|t| t.column(&f.name).is_some()))
    .map(|f| quote(&f.name))
    .collect();
  let columns = copied.join(", ");
  script.statement(format!(
    "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
    quote(&scratch),
    quote(table)
  ));
  script.statement(format!("DROP TABLE {}", quote(table)));
  script.statement(format!("ALTER TABLE {} RENAME TO {}", quote(&scratch), quote(table)));
  indexes(script, table, fields);
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::{
    collab::FallbackLocalizer,
    compile::compile,
    definition::{EntityDefinition, SubEntityDefinition},
    field::FieldMetadata,
    interface::InterfaceKind,
    schema::analyze_changes,
  };

  fn product() -> EntityDefinition {
    EntityDefinition::new("Catalog", "Product")
      .with_field(FieldMetadata::string("Code", 64).required().sort_order(1))
      .with_field(FieldMetadata::string("Name", 200).required().sort_order(2))
  }

  fn descriptor(def: &EntityDefinition) -> CompiledTypeDescriptor {
    compile(def, &HashMap::new()).unwrap()
  }

  #[test]
  fn create_script_for_product() {
    let sql = create_script(&descriptor(&product()), &FallbackLocalizer::default(), "en");
    assert!(sql.starts_with("-- Product: Catalog.Product (Products)\n"));
    assert!(sql.contains("CREATE TABLE \"Products\" (\n"));
    assert!(sql.contains("  \"Id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n"));
    assert!(sql.contains("  \"Code\" VARCHAR(64) NOT NULL,\n"));
    assert!(sql.contains("  \"Name\" VARCHAR(200) NOT NULL\n);"));
  }

  #[test]
  fn interfaces_add_defaults_and_unique_index() {
    let def = EntityDefinition::new("Catalog", "Brand")
      .with_interface(InterfaceKind::Archive)
      .with_interface(InterfaceKind::SoftDelete)
      .with_interface(InterfaceKind::Version);
    let sql = create_script(&descriptor(&def), &FallbackLocalizer::default(), "en");
    assert!(sql.contains("\"IsDeleted\" BOOLEAN NOT NULL DEFAULT 0"));
    assert!(sql.contains("\"Version\" INTEGER NOT NULL DEFAULT 1"));
    assert!(sql.contains("CREATE UNIQUE INDEX \"UX_Brands_Code\" ON \"Brands\" (\"Code\");"));
  }

  #[test]
  fn collections_get_their_own_tables() {
    let def = EntityDefinition::new("Sales", "Order").with_sub_entity(
      SubEntityDefinition::new("Lines").with_field(FieldMetadata::new("Quantity", FieldType::Integer)),
    );
    let sql = create_script(&descriptor(&def), &FallbackLocalizer::default(), "en");
    assert!(sql.contains("CREATE TABLE \"Orders_Lines\""));
    assert!(sql.contains(
      "\"OrderId\" INTEGER NOT NULL REFERENCES \"Orders\"(\"Id\") ON DELETE CASCADE"
    ));
    assert!(sql.contains("CREATE INDEX \"IX_Orders_Lines_OrderId\""));
  }

  #[test]
  fn alter_script_adds_columns() {
    let before = descriptor(&product());
    let applied = AppliedSchema::target(&before);
    let def = product().with_field(FieldMetadata::decimal("Price", 10, 2).sort_order(3));
    let after = descriptor(&def);
    let analysis = analyze_changes(&applied, &AppliedSchema::target(&after));
    let sql = alter_script(&after, &applied, &analysis, &FallbackLocalizer::default(), "en");
    assert!(sql.contains("ALTER TABLE \"Products\" ADD COLUMN \"Price\" NUMERIC(10,2);"));
    assert!(!sql.contains("DROP"));
    assert!(!sql.contains("CREATE TABLE"));
  }

  #[test]
  fn required_column_without_default_is_added_nullable() {
    let before = descriptor(&product());
    let applied = AppliedSchema::target(&before);
    let def = product()
      .with_field(FieldMetadata::string("Sku", 20).required())
      .with_field(FieldMetadata::new("Stock", FieldType::Integer).required().default_value("0"));
    let after = descriptor(&def);
    let analysis = analyze_changes(&applied, &AppliedSchema::target(&after));
    let sql = alter_script(&after, &applied, &analysis, &FallbackLocalizer::default(), "en");
    assert!(sql.contains("ADD COLUMN \"Sku\" VARCHAR(20);"));
    assert!(sql.contains("ADD COLUMN \"Stock\" INTEGER NOT NULL DEFAULT 0;"));
  }

  #[test]
  fn widening_rebuilds_the_table() {
    let before = descriptor(&product());
    let applied = AppliedSchema::target(&before);
    let mut def = product();
    def.fields[1].length = Some(400);
    let after = descriptor(&def);
    let analysis = analyze_changes(&applied, &AppliedSchema::target(&after));
    let sql = alter_script(&after, &applied, &analysis, &FallbackLocalizer::default(), "en");
    assert!(sql.contains("-- widen Products.Name: String(200) -> String(400)"));
    assert!(sql.contains("CREATE TABLE \"Products__widen\""));
    assert!(sql.contains(
      "INSERT INTO \"Products__widen\" (\"Id\", \"Code\", \"Name\") SELECT \"Id\", \"Code\", \"Name\" FROM \"Products\";"
    ));
    assert!(sql.contains("DROP TABLE \"Products\";"));
    assert!(sql.contains("ALTER TABLE \"Products__widen\" RENAME TO \"Products\";"));
  }

  #[test]
  fn rebuild_keeps_columns_added_nullable_nullable() {
    let first = descriptor(&product());
    let mut def = product().with_field(FieldMetadata::string("Sku", 20).required().sort_order(3));
    let second = descriptor(&def);
    let applied = AppliedSchema::published(&second, Some(&AppliedSchema::target(&first)));
    assert!(!applied.table("Products").unwrap().column("Sku").unwrap().not_null);

    def.fields[1].length = Some(400);
    let third = descriptor(&def);
    let analysis = analyze_changes(&applied, &AppliedSchema::target(&third));
    let sql = alter_script(&third, &applied, &analysis, &FallbackLocalizer::default(), "en");
    assert!(sql.contains("  \"Code\" VARCHAR(64) NOT NULL,\n"));
    assert!(sql.contains("  \"Sku\" VARCHAR(20)\n);"));
  }

  #[test]
  fn quoting_and_literals() {
    assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    assert_eq!(literal(&Value::Text("it's".into())), "'it''s'");
    assert_eq!(literal(&Value::Bool(true)), "1");
  }
}
