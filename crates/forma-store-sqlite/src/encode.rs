//! Encoding and decoding helpers between Forma types and SQLite columns.
//!
//! Metadata timestamps are fixed-width RFC 3339 strings, UUIDs are hyphenated lowercase
//! strings and locale maps, parent links, applied schemas and validation
//! rules are compact JSON. Entity cells are mapped per field type: booleans
//! as 0/1, decimals bound as text into NUMERIC columns, temporal values and
//! GUIDs as fixed-format text.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use forma_core::{
  definition::{
    EntityDefinition, EntityInterface, LocalizedText, ParentLink, SubEntityDefinition,
  },
  field::{FieldMetadata, FieldType},
  query::ColumnSpec,
  schema::AppliedSchema,
  script::DdlScript,
  value::{Value, format_date, format_datetime, parse_date, parse_datetime},
};
use rusqlite::types::Value as SqlValue;
use rust_decimal::{Decimal, prelude::FromPrimitive as _};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

/// Fixed width, so text order is time order.
pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(e.to_string()))
}

/// Parse a strum-encoded enumeration column.
pub fn decode_enum<T: FromStr>(s: &str, what: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

fn small(v: Option<i64>, what: &str) -> Result<Option<u32>> {
  v.map(|v| u32::try_from(v).map_err(|_| Error::Decode(format!("{what} out of range: {v}"))))
    .transpose()
}

fn revision(v: Option<i64>) -> Result<Option<u64>> {
  v.map(|v| u64::try_from(v).map_err(|_| Error::Decode(format!("negative revision: {v}"))))
    .transpose()
}

// Helpers for use inside `Connection::call` closures, where errors must be
// `rusqlite::Error`.

fn conversion<E: std::error::Error + Send + Sync + 'static>(e: E) -> rusqlite::Error {
  rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

pub fn to_json<T: Serialize>(value: &T) -> rusqlite::Result<String> {
  serde_json::to_string(value).map_err(conversion)
}

pub fn to_int(v: u64) -> rusqlite::Result<i64> { i64::try_from(v).map_err(conversion) }

// ─── Definition aggregates ───────────────────────────────────────────────────

/// Insert or replace a definition and all its children. Must run inside a
/// transaction.
pub fn write_definition(conn: &rusqlite::Connection, d: &EntityDefinition) -> rusqlite::Result<()> {
  let id = encode_uuid(d.id);
  let parent = d.parent.as_ref().map(to_json).transpose()?;
  let applied = d.applied_schema.as_ref().map(to_json).transpose()?;

  conn.execute(
    "INSERT INTO entity_definitions (
       definition_id, namespace, entity_name, route, display_name, description,
       structure, status, is_locked, is_enabled, parent_json, revision,
       applied_schema, created_at, created_by, updated_at, updated_by
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
     ON CONFLICT (definition_id) DO UPDATE SET
       namespace      = excluded.namespace,
       entity_name    = excluded.entity_name,
       route          = excluded.route,
       display_name   = excluded.display_name,
       description    = excluded.description,
       structure      = excluded.structure,
       status         = excluded.status,
       is_locked      = excluded.is_locked,
       is_enabled     = excluded.is_enabled,
       parent_json    = excluded.parent_json,
       revision       = excluded.revision,
       applied_schema = excluded.applied_schema,
       created_at     = excluded.created_at,
       created_by     = excluded.created_by,
       updated_at     = excluded.updated_at,
       updated_by     = excluded.updated_by",
    rusqlite::params![
      id,
      d.namespace,
      d.entity_name,
      d.route,
      to_json(&d.display_name)?,
      to_json(&d.description)?,
      d.structure.to_string(),
      d.status.to_string(),
      d.is_locked,
      d.is_enabled,
      parent,
      to_int(d.revision)?,
      applied,
      encode_dt(d.created_at),
      d.created_by,
      encode_dt(d.updated_at),
      d.updated_by,
    ],
  )?;

  conn.execute("DELETE FROM field_metadata WHERE definition_id = ?1", [&id])?;
  conn.execute("DELETE FROM sub_entity_definitions WHERE definition_id = ?1", [&id])?;
  conn.execute("DELETE FROM entity_interfaces WHERE definition_id = ?1", [&id])?;

  for (position, sub) in d.sub_entities.iter().enumerate() {
    let sub_id = encode_uuid(sub.id);
    conn.execute(
      "INSERT INTO sub_entity_definitions (
         sub_entity_id, definition_id, position, code, display_name, description,
         sort_order, default_sort_field, sort_descending, foreign_key_field,
         collection_name, cascade_behavior, published_revision
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
      rusqlite::params![
        sub_id,
        id,
        to_int(position as u64)?,
        sub.code,
        to_json(&sub.display_name)?,
        to_json(&sub.description)?,
        sub.sort_order,
        sub.default_sort_field,
        sub.sort_descending,
        sub.foreign_key_field,
        sub.collection_name,
        sub.cascade.to_string(),
        sub.published_revision.map(to_int).transpose()?,
      ],
    )?;
    for (position, field) in sub.fields.iter().enumerate() {
      write_field(conn, &id, Some(&sub_id), position, field)?;
    }
  }

  for (position, field) in d.fields.iter().enumerate() {
    write_field(conn, &id, None, position, field)?;
  }

  for interface in &d.interfaces {
    conn.execute(
      "INSERT INTO entity_interfaces (interface_id, definition_id, kind, is_enabled, is_locked)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![
        encode_uuid(interface.id),
        id,
        interface.kind.to_string(),
        interface.is_enabled,
        interface.is_locked,
      ],
    )?;
  }
  Ok(())
}

fn write_field(
  conn: &rusqlite::Connection,
  definition_id: &str,
  sub_entity_id: Option<&str>,
  position: usize,
  f: &FieldMetadata,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO field_metadata (
       field_id, definition_id, sub_entity_id, position, parent_field_id, property_name,
       display_name, data_type, length, precision, scale, is_required, is_entity_ref,
       referenced_entity_id, on_delete, lookup_display_field, enum_code, default_value,
       validation_rules, sort_order, source, published_revision, is_deleted, deleted_at,
       deleted_by
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
               ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
    rusqlite::params![
      encode_uuid(f.id),
      definition_id,
      sub_entity_id,
      to_int(position as u64)?,
      f.parent_field_id.map(encode_uuid),
      f.property_name,
      to_json(&f.display_name)?,
      f.data_type,
      f.length,
      f.precision,
      f.scale,
      f.is_required,
      f.is_entity_ref,
      f.referenced_entity_id.map(encode_uuid),
      f.on_delete.to_string(),
      f.lookup_display_field,
      f.enum_code,
      f.default_value,
      f.validation_rules.as_ref().map(to_json).transpose()?,
      f.sort_order,
      f.source.to_string(),
      f.published_revision.map(to_int).transpose()?,
      f.is_deleted,
      f.deleted_at.map(encode_dt),
      f.deleted_by,
    ],
  )?;
  Ok(())
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Raw column values of an `entity_definitions` row and its children.
pub struct RawDefinition {
  pub definition_id:  String,
  pub namespace:      String,
  pub entity_name:    String,
  pub route:          String,
  pub display_name:   String,
  pub description:    String,
  pub structure:      String,
  pub status:         String,
  pub is_locked:      bool,
  pub is_enabled:     bool,
  pub parent_json:    Option<String>,
  pub revision:       i64,
  pub applied_schema: Option<String>,
  pub created_at:     String,
  pub created_by:     Option<String>,
  pub updated_at:     String,
  pub updated_by:     Option<String>,
  pub sub_entities:   Vec<RawSubEntity>,
  pub fields:         Vec<RawField>,
  pub interfaces:     Vec<RawInterface>,
}

pub struct RawSubEntity {
  pub sub_entity_id:      String,
  pub code:               String,
  pub display_name:       String,
  pub description:        String,
  pub sort_order:         i32,
  pub default_sort_field: Option<String>,
  pub sort_descending:    bool,
  pub foreign_key_field:  Option<String>,
  pub collection_name:    Option<String>,
  pub cascade_behavior:   String,
  pub published_revision: Option<i64>,
}

pub struct RawField {
  pub field_id:             String,
  pub sub_entity_id:        Option<String>,
  pub parent_field_id:      Option<String>,
  pub property_name:        String,
  pub display_name:         String,
  pub data_type:            String,
  pub length:               Option<i64>,
  pub precision:            Option<i64>,
  pub scale:                Option<i64>,
  pub is_required:          bool,
  pub is_entity_ref:        bool,
  pub referenced_entity_id: Option<String>,
  pub on_delete:            String,
  pub lookup_display_field: Option<String>,
  pub enum_code:            Option<String>,
  pub default_value:        Option<String>,
  pub validation_rules:     Option<String>,
  pub sort_order:           i32,
  pub source:               String,
  pub published_revision:   Option<i64>,
  pub is_deleted:           bool,
  pub deleted_at:           Option<String>,
  pub deleted_by:           Option<String>,
}

pub struct RawInterface {
  pub interface_id: String,
  pub kind:         String,
  pub is_enabled:   bool,
  pub is_locked:    bool,
}

pub const DEFINITION_COLUMNS: &str = "definition_id, namespace, entity_name, route, \
  display_name, description, structure, status, is_locked, is_enabled, parent_json, revision, \
  applied_schema, created_at, created_by, updated_at, updated_by";

impl RawDefinition {
  /// Read the row selected with [`DEFINITION_COLUMNS`]; children are loaded
  /// separately.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      definition_id:  row.get(0)?,
      namespace:      row.get(1)?,
      entity_name:    row.get(2)?,
      route:          row.get(3)?,
      display_name:   row.get(4)?,
      description:    row.get(5)?,
      structure:      row.get(6)?,
      status:         row.get(7)?,
      is_locked:      row.get(8)?,
      is_enabled:     row.get(9)?,
      parent_json:    row.get(10)?,
      revision:       row.get(11)?,
      applied_schema: row.get(12)?,
      created_at:     row.get(13)?,
      created_by:     row.get(14)?,
      updated_at:     row.get(15)?,
      updated_by:     row.get(16)?,
      sub_entities:   Vec::new(),
      fields:         Vec::new(),
      interfaces:     Vec::new(),
    })
  }

  pub fn load_children(&mut self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
      "SELECT sub_entity_id, code, display_name, description, sort_order, default_sort_field,
              sort_descending, foreign_key_field, collection_name, cascade_behavior,
              published_revision
       FROM sub_entity_definitions WHERE definition_id = ?1 ORDER BY position",
    )?;
    self.sub_entities = stmt
      .query_map([&self.definition_id], |row| {
        Ok(RawSubEntity {
          sub_entity_id:      row.get(0)?,
          code:               row.get(1)?,
          display_name:       row.get(2)?,
          description:        row.get(3)?,
          sort_order:         row.get(4)?,
          default_sort_field: row.get(5)?,
          sort_descending:    row.get(6)?,
          foreign_key_field:  row.get(7)?,
          collection_name:    row.get(8)?,
          cascade_behavior:   row.get(9)?,
          published_revision: row.get(10)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
      "SELECT field_id, sub_entity_id, parent_field_id, property_name, display_name,
              data_type, length, precision, scale, is_required, is_entity_ref,
              referenced_entity_id, on_delete, lookup_display_field, enum_code,
              default_value, validation_rules, sort_order, source, published_revision,
              is_deleted, deleted_at, deleted_by
       FROM field_metadata WHERE definition_id = ?1 ORDER BY position",
    )?;
    self.fields = stmt
      .query_map([&self.definition_id], |row| {
        Ok(RawField {
          field_id:             row.get(0)?,
          sub_entity_id:        row.get(1)?,
          parent_field_id:      row.get(2)?,
          property_name:        row.get(3)?,
          display_name:         row.get(4)?,
          data_type:            row.get(5)?,
          length:               row.get(6)?,
          precision:            row.get(7)?,
          scale:                row.get(8)?,
          is_required:          row.get(9)?,
          is_entity_ref:        row.get(10)?,
          referenced_entity_id: row.get(11)?,
          on_delete:            row.get(12)?,
          lookup_display_field: row.get(13)?,
          enum_code:            row.get(14)?,
          default_value:        row.get(15)?,
          validation_rules:     row.get(16)?,
          sort_order:           row.get(17)?,
          source:               row.get(18)?,
          published_revision:   row.get(19)?,
          is_deleted:           row.get(20)?,
          deleted_at:           row.get(21)?,
          deleted_by:           row.get(22)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
      "SELECT interface_id, kind, is_enabled, is_locked
       FROM entity_interfaces WHERE definition_id = ?1 ORDER BY rowid",
    )?;
    self.interfaces = stmt
      .query_map([&self.definition_id], |row| {
        Ok(RawInterface {
          interface_id: row.get(0)?,
          kind:         row.get(1)?,
          is_enabled:   row.get(2)?,
          is_locked:    row.get(3)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
  }

  pub fn into_definition(self) -> Result<EntityDefinition> {
    let mut sub_entities = Vec::with_capacity(self.sub_entities.len());
    let mut sub_ids = Vec::with_capacity(self.sub_entities.len());
    for raw in self.sub_entities {
      sub_ids.push(raw.sub_entity_id.clone());
      sub_entities.push(raw.into_sub_entity()?);
    }

    let mut fields = Vec::new();
    for raw in self.fields {
      let owner = raw.sub_entity_id.clone();
      let field = raw.into_field()?;
      match owner {
        None => fields.push(field),
        Some(owner) => {
          let index = sub_ids
            .iter()
            .position(|id| *id == owner)
            .ok_or_else(|| Error::Decode(format!("field owned by unknown sub-entity {owner}")))?;
          sub_entities[index].fields.push(field);
        }
      }
    }

    let interfaces = self
      .interfaces
      .into_iter()
      .map(|raw| {
        Ok(EntityInterface {
          id:         decode_uuid(&raw.interface_id)?,
          kind:       decode_enum(&raw.kind, "interface kind")?,
          is_enabled: raw.is_enabled,
          is_locked:  raw.is_locked,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(EntityDefinition {
      id: decode_uuid(&self.definition_id)?,
      namespace: self.namespace,
      entity_name: self.entity_name,
      route: self.route,
      display_name: decode_json::<LocalizedText>(&self.display_name)?,
      description: decode_json::<LocalizedText>(&self.description)?,
      structure: decode_enum(&self.structure, "structure")?,
      status: decode_enum(&self.status, "status")?,
      is_locked: self.is_locked,
      is_enabled: self.is_enabled,
      parent: self
        .parent_json
        .as_deref()
        .map(decode_json::<ParentLink>)
        .transpose()?,
      fields,
      interfaces,
      sub_entities,
      revision: revision(Some(self.revision))?.unwrap_or_default(),
      applied_schema: self
        .applied_schema
        .as_deref()
        .map(decode_json::<AppliedSchema>)
        .transpose()?,
      created_at: decode_dt(&self.created_at)?,
      created_by: self.created_by,
      updated_at: decode_dt(&self.updated_at)?,
      updated_by: self.updated_by,
    })
  }
}

impl RawSubEntity {
  fn into_sub_entity(self) -> Result<SubEntityDefinition> {
    Ok(SubEntityDefinition {
      id:                 decode_uuid(&self.sub_entity_id)?,
      code:               self.code,
      display_name:       decode_json(&self.display_name)?,
      description:        decode_json(&self.description)?,
      sort_order:         self.sort_order,
      default_sort_field: self.default_sort_field,
      sort_descending:    self.sort_descending,
      foreign_key_field:  self.foreign_key_field,
      collection_name:    self.collection_name,
      cascade:            decode_enum(&self.cascade_behavior, "cascade behavior")?,
      published_revision: revision(self.published_revision)?,
      fields:             Vec::new(),
    })
  }
}

impl RawField {
  fn into_field(self) -> Result<FieldMetadata> {
    Ok(FieldMetadata {
      id:                   decode_uuid(&self.field_id)?,
      parent_field_id:      self.parent_field_id.as_deref().map(decode_uuid).transpose()?,
      property_name:        self.property_name,
      display_name:         decode_json(&self.display_name)?,
      data_type:            self.data_type,
      length:               small(self.length, "length")?,
      precision:            small(self.precision, "precision")?,
      scale:                small(self.scale, "scale")?,
      is_required:          self.is_required,
      is_entity_ref:        self.is_entity_ref,
      referenced_entity_id: self
        .referenced_entity_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      on_delete:            decode_enum(&self.on_delete, "cascade behavior")?,
      lookup_display_field: self.lookup_display_field,
      enum_code:            self.enum_code,
      default_value:        self.default_value,
      validation_rules:     self.validation_rules.as_deref().map(decode_json).transpose()?,
      sort_order:           self.sort_order,
      source:               decode_enum(&self.source, "field source")?,
      published_revision:   revision(self.published_revision)?,
      is_deleted:           self.is_deleted,
      deleted_at:           self.deleted_at.as_deref().map(decode_dt).transpose()?,
      deleted_by:           self.deleted_by,
    })
  }
}

// ─── DDL scripts ─────────────────────────────────────────────────────────────

pub const SCRIPT_COLUMNS: &str = "script_id, definition_id, script_type, script, status, \
  created_at, created_by, executed_at, error_message";

pub struct RawScript {
  pub script_id:     String,
  pub definition_id: String,
  pub script_type:   String,
  pub script:        String,
  pub status:        String,
  pub created_at:    String,
  pub created_by:    Option<String>,
  pub executed_at:   Option<String>,
  pub error_message: Option<String>,
}

impl RawScript {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      script_id:     row.get(0)?,
      definition_id: row.get(1)?,
      script_type:   row.get(2)?,
      script:        row.get(3)?,
      status:        row.get(4)?,
      created_at:    row.get(5)?,
      created_by:    row.get(6)?,
      executed_at:   row.get(7)?,
      error_message: row.get(8)?,
    })
  }

  pub fn into_script(self) -> Result<DdlScript> {
    Ok(DdlScript {
      id:            decode_uuid(&self.script_id)?,
      definition_id: decode_uuid(&self.definition_id)?,
      script_type:   decode_enum(&self.script_type, "script type")?,
      script:        self.script,
      status:        decode_enum(&self.status, "script status")?,
      created_at:    decode_dt(&self.created_at)?,
      created_by:    self.created_by,
      executed_at:   self.executed_at.as_deref().map(decode_dt).transpose()?,
      error_message: self.error_message,
    })
  }
}

// ─── Entity cells ────────────────────────────────────────────────────────────

/// Bind form of a typed value.
pub fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Integer(i) => SqlValue::Integer(*i),
    // NUMERIC affinity converts the text on insert and in comparisons.
    Value::Decimal(d) => SqlValue::Text(d.to_string()),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::DateTime(dt) => SqlValue::Text(format_datetime(*dt)),
    Value::Date(d) => SqlValue::Text(format_date(*d)),
    Value::Guid(g) => SqlValue::Text(encode_uuid(*g)),
  }
}

/// Decode a stored cell as the type its field declares.
pub fn from_sql(raw: SqlValue, spec: &ColumnSpec) -> Result<Value> {
  let bad = |raw: &SqlValue| {
    Error::Decode(format!("column {} holds {raw:?}, not {}", spec.name, spec.field_type))
  };

  if matches!(raw, SqlValue::Null) {
    return Ok(Value::Null);
  }

  Ok(match spec.field_type {
    FieldType::Boolean => match &raw {
      SqlValue::Integer(i) => Value::Bool(*i != 0),
      SqlValue::Text(s) if s == "1" || s.eq_ignore_ascii_case("true") => Value::Bool(true),
      SqlValue::Text(s) if s == "0" || s.eq_ignore_ascii_case("false") => Value::Bool(false),
      _ => return Err(bad(&raw)),
    },
    FieldType::Integer | FieldType::Long | FieldType::EntityRef => match &raw {
      SqlValue::Integer(i) => Value::Integer(*i),
      SqlValue::Real(f) if f.fract() == 0.0 => Value::Integer(*f as i64),
      SqlValue::Text(s) => Value::Integer(s.trim().parse().map_err(|_| bad(&raw))?),
      _ => return Err(bad(&raw)),
    },
    FieldType::Decimal => {
      let d = match &raw {
        SqlValue::Integer(i) => Decimal::from(*i),
        SqlValue::Real(f) => Decimal::from_f64(*f).ok_or_else(|| bad(&raw))?,
        SqlValue::Text(s) => Decimal::from_str(s.trim()).map_err(|_| bad(&raw))?,
        SqlValue::Blob(_) | SqlValue::Null => return Err(bad(&raw)),
      };
      Value::Decimal(match spec.scale {
        Some(scale) => {
          let mut d = d.round_dp(scale);
          d.rescale(scale);
          d
        }
        None => d,
      })
    }
    FieldType::String | FieldType::Text | FieldType::Enum => match raw {
      SqlValue::Text(s) => Value::Text(s),
      SqlValue::Integer(i) => Value::Text(i.to_string()),
      SqlValue::Real(f) => Value::Text(f.to_string()),
      other => return Err(bad(&other)),
    },
    FieldType::DateTime => match &raw {
      SqlValue::Text(s) => Value::DateTime(parse_datetime(s).ok_or_else(|| bad(&raw))?),
      _ => return Err(bad(&raw)),
    },
    FieldType::Date => match &raw {
      SqlValue::Text(s) => Value::Date(parse_date(s).ok_or_else(|| bad(&raw))?),
      _ => return Err(bad(&raw)),
    },
    FieldType::Guid => match &raw {
      SqlValue::Text(s) => Value::Guid(Uuid::parse_str(s).map_err(|_| bad(&raw))?),
      _ => return Err(bad(&raw)),
    },
  })
}

/// Decode a cell by storage class alone.
pub fn from_sql_loose(raw: SqlValue) -> Value {
  match raw {
    SqlValue::Null => Value::Null,
    SqlValue::Integer(i) => Value::Integer(i),
    SqlValue::Real(f) => Decimal::from_f64(f).map_or(Value::Null, Value::Decimal),
    SqlValue::Text(s) => Value::Text(s),
    SqlValue::Blob(b) => Value::Text(hex::encode(b)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(field_type: FieldType, scale: Option<u32>) -> ColumnSpec {
    ColumnSpec {
      name: "C".into(),
      field_type,
      scale,
    }
  }

  #[test]
  fn decimals_decode_at_field_scale() {
    let v = from_sql(SqlValue::Real(12.5), &spec(FieldType::Decimal, Some(2))).unwrap();
    assert_eq!(v, Value::Decimal(Decimal::new(1250, 2)));
    assert_eq!(v.to_json(), serde_json::json!("12.50"));

    let v = from_sql(SqlValue::Integer(3), &spec(FieldType::Decimal, Some(2))).unwrap();
    assert_eq!(v.to_json(), serde_json::json!("3.00"));
  }

  #[test]
  fn booleans_round_trip_as_integers() {
    assert_eq!(to_sql(&Value::Bool(true)), SqlValue::Integer(1));
    assert_eq!(
      from_sql(SqlValue::Integer(0), &spec(FieldType::Boolean, None)).unwrap(),
      Value::Bool(false)
    );
  }

  #[test]
  fn mismatched_storage_is_a_decode_error() {
    let err = from_sql(SqlValue::Text("soon".into()), &spec(FieldType::DateTime, None));
    assert!(matches!(err, Err(Error::Decode(_))));
  }

  #[test]
  fn loose_decoding_follows_storage_class() {
    assert_eq!(from_sql_loose(SqlValue::Integer(7)), Value::Integer(7));
    assert_eq!(from_sql_loose(SqlValue::Blob(vec![0xab, 0x01])), Value::Text("ab01".into()));
  }
}
