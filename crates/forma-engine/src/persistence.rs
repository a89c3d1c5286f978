//! Generic persistence over published types.
//!
//! Records are addressed by full type name (`Sales.Product`) or by a bare
//! entity name when that is unambiguous. Only the live shape of a type is
//! visible: fields and collections that have been published. Input is
//! JSON; every value goes through strict coercion before it reaches the
//! store.

use std::sync::Arc;

use chrono::Utc;
use forma_core::{
  cancel::CancelSignal,
  compile::{CompiledCollection, CompiledField, CompiledTypeDescriptor, PRIMARY_KEY},
  query::{ColumnSpec, Condition, Filter, OrderBy, QueryOptions, SelectSpec},
  row::{Assignments, ChildRows, Record, RowInsert, RowUpdate, VersionGuard},
  store::EntityStore,
  validate::{RESERVED_TABLES, ValidationError, is_identifier},
  value::{Value, coerce, coerce_filter, loose},
};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  engine::Engine,
  error::{Error, Result},
};

const IS_DELETED: &str = "IsDeleted";
const DELETED_AT: &str = "DeletedAt";
const DELETED_BY: &str = "DeletedBy";
const VERSION: &str = "Version";

impl<S: EntityStore> Engine<S> {
  // ─── Reads ─────────────────────────────────────────────────────────────────

  /// One record with its collections, or `None`.
  pub async fn get_by_id(&self, type_name: &str, id: i64) -> Result<Option<Record>> {
    let descriptor = self.resolve_type(type_name).await?;
    self.load(&descriptor, id).await
  }

  pub async fn query(&self, type_name: &str, options: QueryOptions) -> Result<Vec<Record>> {
    let descriptor = self.resolve_type(type_name).await?;
    let mut conditions = filter_conditions(&descriptor, &options.filters)?;
    conditions.extend(live_rows(&descriptor));

    let order_by = match &options.order_by {
      Some(name) => {
        let field = descriptor
          .live_field(name)
          .ok_or_else(|| Error::UnknownField { field: name.clone() })?;
        OrderBy {
          column:     field.name.clone(),
          descending: options.order_by_descending,
        }
      }
      None => OrderBy {
        column:     PRIMARY_KEY.to_owned(),
        descending: options.order_by_descending,
      },
    };

    let spec = SelectSpec {
      columns: Some(column_specs(descriptor.live_fields())),
      conditions,
      order_by: Some(order_by),
      skip: options.skip.unwrap_or(0),
      take: self.config.take(options.take),
    };
    let rows = self
      .store
      .select_rows(descriptor.table_name.clone(), spec)
      .await
      .map_err(Error::store)?;
    Ok(rows.into_iter().map(Record::from_row).collect())
  }

  pub async fn count(&self, type_name: &str, filters: &[Filter]) -> Result<u64> {
    let descriptor = self.resolve_type(type_name).await?;
    let mut conditions = filter_conditions(&descriptor, filters)?;
    conditions.extend(live_rows(&descriptor));
    self
      .store
      .count_rows(descriptor.table_name.clone(), conditions)
      .await
      .map_err(Error::store)
  }

  // ─── Writes ────────────────────────────────────────────────────────────────

  /// Insert a record and its collections. Returns the stored record.
  pub async fn create(
    &self,
    type_name: &str,
    data: &Json,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<Record> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let descriptor = self.resolve_type(type_name).await?;
    let object = as_object(data, &descriptor.entity_name)?;

    let mut values = Assignments::new();
    let mut children = Vec::new();
    for (key, raw) in object {
      if let Some(collection) = descriptor.live_collections().find(|c| c.name.eq_ignore_ascii_case(key)) {
        children.push(child_rows(collection, raw)?);
        continue;
      }
      let field = writable(&descriptor, key)?;
      values.push((field.name.clone(), coerce(field, raw)?));
    }

    let now = Value::DateTime(Utc::now());
    for field in descriptor.live_fields().filter(|f| !f.primary_key) {
      if values.iter().any(|(name, _)| *name == field.name) {
        continue;
      }
      let value = match stamp_on_create(&descriptor, field, &now, actor) {
        Some(value) => value,
        None => match &field.default_value {
          Some(default) => default.evaluate(),
          None => continue,
        },
      };
      values.push((field.name.clone(), value));
    }
    require(descriptor.live_fields(), &values, None)?;

    let id = self
      .store
      .insert_row(descriptor.table_name.clone(), RowInsert { values, children }, cancel.clone())
      .await
      .map_err(|e| write_error(e, &cancel))?;
    debug!(entity = %descriptor.full_type_name, id, "record created");

    self
      .load(&descriptor, id)
      .await?
      .ok_or_else(|| Error::RowNotFound {
        type_name: descriptor.full_type_name.clone(),
        id,
      })
  }

  /// Patch the supplied keys of a record.
  ///
  /// On a versioned type a `Version` key carries the version the caller
  /// last read; without it the stored version is expected. Either way a
  /// successful update increments it. Supplied collections replace the
  /// stored child rows.
  pub async fn update(
    &self,
    type_name: &str,
    id: i64,
    data: &Json,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<Record> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let descriptor = self.resolve_type(type_name).await?;
    let object = as_object(data, &descriptor.entity_name)?;
    let not_found = || Error::RowNotFound {
      type_name: descriptor.full_type_name.clone(),
      id,
    };

    let version_field = descriptor
      .capabilities
      .versioned
      .then(|| descriptor.live_field(VERSION))
      .flatten();

    let mut expected = None;
    let mut values = Assignments::new();
    let mut children = Vec::new();
    for (key, raw) in object {
      if let Some(collection) = descriptor.live_collections().find(|c| c.name.eq_ignore_ascii_case(key)) {
        children.push(child_rows(collection, raw)?);
        continue;
      }
      if let Some(version) = version_field
        && version.name.eq_ignore_ascii_case(key)
      {
        let stated = coerce_filter(version, raw)?
          .as_i64()
          .ok_or_else(|| Error::TypeCoercion {
            field:   version.name.clone(),
            message: "expected version must be an integer".into(),
          })?;
        expected = Some(stated);
        continue;
      }
      let field = writable(&descriptor, key)?;
      values.push((field.name.clone(), coerce(field, raw)?));
    }
    require(
      descriptor
        .live_fields()
        .filter(|f| values.iter().any(|(name, _)| *name == f.name)),
      &values,
      None,
    )?;

    if descriptor.capabilities.audited {
      let now = Value::DateTime(Utc::now());
      for field in descriptor.live_fields() {
        let value = match field.name.as_str() {
          "UpdatedAt" => now.clone(),
          "UpdatedBy" => actor.map_or(Value::Null, |a| Value::Text(a.to_owned())),
          _ => continue,
        };
        values.push((field.name.clone(), value));
      }
    }

    let guard = match version_field {
      Some(version) => {
        let expected = match expected {
          Some(v) => v,
          None => {
            let current = self.load(&descriptor, id).await?.ok_or_else(not_found)?;
            current.get(&version.name).and_then(Value::as_i64).unwrap_or(0)
          }
        };
        Some(VersionGuard {
          column: version.name.clone(),
          expected,
        })
      }
      None => None,
    };

    let update = RowUpdate {
      id,
      values,
      guard: guard.clone(),
      conditions: live_rows(&descriptor).into_iter().collect(),
      children,
    };
    let affected = self
      .store
      .update_row(descriptor.table_name.clone(), update, cancel.clone())
      .await
      .map_err(|e| write_error(e, &cancel))?;

    if affected == 0 {
      let exists = self.load(&descriptor, id).await?.is_some();
      return Err(match guard {
        Some(_) if exists => Error::ConcurrencyConflict {
          type_name: descriptor.full_type_name.clone(),
          id,
        },
        _ => not_found(),
      });
    }
    debug!(entity = %descriptor.full_type_name, id, "record updated");
    self.load(&descriptor, id).await?.ok_or_else(not_found)
  }

  /// Delete a record. Types with a live soft-delete column keep the row and
  /// hide it from reads. Returns whether a row was affected.
  pub async fn delete(
    &self,
    type_name: &str,
    id: i64,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<bool> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let descriptor = self.resolve_type(type_name).await?;
    let table = descriptor.table_name.clone();

    let affected = if descriptor.capabilities.soft_delete {
      let now = Value::DateTime(Utc::now());
      let actor = actor.map_or(Value::Null, |a| Value::Text(a.to_owned()));
      let values = descriptor
        .live_fields()
        .filter_map(|f| {
          let value = match f.name.as_str() {
            IS_DELETED => Value::Bool(true),
            DELETED_AT => now.clone(),
            DELETED_BY => actor.clone(),
            "UpdatedAt" if descriptor.capabilities.audited => now.clone(),
            "UpdatedBy" if descriptor.capabilities.audited => actor.clone(),
            _ => return None,
          };
          Some((f.name.clone(), value))
        })
        .collect();
      let update = RowUpdate {
        id,
        values,
        guard: None,
        conditions: live_rows(&descriptor).into_iter().collect(),
        children: Vec::new(),
      };
      self.store.update_row(table, update, cancel.clone()).await
    } else {
      self.store.delete_row(table, id, cancel.clone()).await
    }
    .map_err(|e| write_error(e, &cancel))?;

    debug!(entity = %descriptor.full_type_name, id, affected, "record deleted");
    Ok(affected > 0)
  }

  // ─── Raw tables ────────────────────────────────────────────────────────────

  /// Query a physical table directly. Columns come from the table itself
  /// and values are typed only as loosely as the storage allows.
  pub async fn query_raw(&self, table: &str, options: QueryOptions) -> Result<Vec<Record>> {
    let reserved = RESERVED_TABLES.iter().any(|t| t.eq_ignore_ascii_case(table));
    if !is_identifier(table) || reserved {
      return Err(Error::TableNotFound(table.to_owned()));
    }
    let columns = self
      .store
      .table_columns(table.to_owned())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::TableNotFound(table.to_owned()))?;
    let column = |name: &str| {
      columns
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.name.clone())
        .ok_or_else(|| Error::UnknownField { field: name.to_owned() })
    };

    let conditions = options
      .filters
      .iter()
      .map(|f| -> Result<Condition> {
        let value = if f.op.is_unary() { Value::Null } else { loose(&f.value)? };
        Ok(Condition {
          column: column(&f.field)?,
          op: f.op,
          value,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    let order_by = match &options.order_by {
      Some(name) => Some(column(name)?),
      None => columns.iter().find(|c| c.primary_key).map(|c| c.name.clone()),
    }
    .map(|column| OrderBy {
      column,
      descending: options.order_by_descending,
    });

    let spec = SelectSpec {
      columns: None,
      conditions,
      order_by,
      skip: options.skip.unwrap_or(0),
      take: self.config.take(options.take),
    };
    let rows = self
      .store
      .select_rows(table.to_owned(), spec)
      .await
      .map_err(Error::store)?;
    Ok(rows.into_iter().map(Record::from_row).collect())
  }

  // ─── Type resolution ───────────────────────────────────────────────────────

  /// The live descriptor for a type name. A definition that no longer
  /// compiles is served from its last good descriptor.
  async fn resolve_type(&self, type_name: &str) -> Result<Arc<CompiledTypeDescriptor>> {
    let id = match self.cache.resolve_name(type_name) {
      Some(id) => id,
      None => self.lookup_type(type_name).await?,
    };
    let descriptor = match self.compile(id).await {
      Ok(descriptor) => descriptor,
      Err(e @ Error::Compile { .. }) => match self.cache.last_known(id) {
        Some(previous) => {
          warn!(definition = %id, error = %e, "compile failed; using last good descriptor");
          previous
        }
        None => return Err(e),
      },
      Err(e) => return Err(e),
    };
    if !descriptor.published {
      return Err(Error::TypeNotFound(type_name.to_owned()));
    }
    Ok(descriptor)
  }

  async fn lookup_type(&self, type_name: &str) -> Result<Uuid> {
    let all = self.store.list_definitions().await.map_err(Error::store)?;
    if let Some(d) = all
      .iter()
      .find(|d| d.full_type_name().eq_ignore_ascii_case(type_name))
    {
      return Ok(d.id);
    }
    let mut bare = all
      .iter()
      .filter(|d| d.entity_name.eq_ignore_ascii_case(type_name));
    match (bare.next(), bare.next()) {
      (Some(d), None) => Ok(d.id),
      (Some(_), Some(_)) => Err(Error::TypeNotFound(format!(
        "{type_name} (ambiguous; use the full type name)"
      ))),
      _ => Err(Error::TypeNotFound(type_name.to_owned())),
    }
  }

  /// Row `id` plus every live collection, children in their default sort.
  async fn load(&self, descriptor: &CompiledTypeDescriptor, id: i64) -> Result<Option<Record>> {
    let mut conditions = vec![Condition::eq(PRIMARY_KEY, Value::Integer(id))];
    conditions.extend(live_rows(descriptor));
    let spec = SelectSpec {
      columns: Some(column_specs(descriptor.live_fields())),
      conditions,
      order_by: None,
      skip: 0,
      take: 1,
    };
    let Some(row) = self
      .store
      .select_rows(descriptor.table_name.clone(), spec)
      .await
      .map_err(Error::store)?
      .into_iter()
      .next()
    else {
      return Ok(None);
    };

    let mut record = Record::from_row(row);
    for collection in descriptor.live_collections() {
      let sort = collection
        .default_sort
        .as_deref()
        .and_then(|s| collection.live_fields().find(|f| f.name.eq_ignore_ascii_case(s)))
        .map_or(PRIMARY_KEY, |f| f.name.as_str());
      let spec = SelectSpec {
        columns:    Some(column_specs(collection.live_fields())),
        conditions: vec![Condition::eq(&collection.foreign_key, Value::Integer(id))],
        order_by:   Some(OrderBy {
          column:     sort.to_owned(),
          descending: collection.sort_descending,
        }),
        skip:       0,
        take:       u64::MAX,
      };
      let rows = self
        .store
        .select_rows(collection.table_name.clone(), spec)
        .await
        .map_err(Error::store)?;
      record
        .collections
        .insert(collection.name.clone(), rows.into_iter().map(Record::from_row).collect());
    }
    Ok(Some(record))
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn write_error(e: impl std::error::Error + Send + Sync + 'static, cancel: &CancelSignal) -> Error {
  if cancel.is_cancelled() { Error::Cancelled } else { Error::store(e) }
}

fn column_specs<'a>(fields: impl Iterator<Item = &'a CompiledField>) -> Vec<ColumnSpec> {
  fields
    .map(|f| ColumnSpec {
      name:       f.name.clone(),
      field_type: f.field_type,
      scale:      f.scale,
    })
    .collect()
}

/// Hides soft-deleted rows.
fn live_rows(descriptor: &CompiledTypeDescriptor) -> Option<Condition> {
  descriptor
    .capabilities
    .soft_delete
    .then(|| Condition::eq(IS_DELETED, Value::Bool(false)))
}

fn filter_conditions(descriptor: &CompiledTypeDescriptor, filters: &[Filter]) -> Result<Vec<Condition>> {
  filters
    .iter()
    .map(|f| -> Result<Condition> {
      let field = descriptor
        .live_field(&f.field)
        .ok_or_else(|| Error::UnknownField { field: f.field.clone() })?;
      let value = if f.op.is_unary() {
        Value::Null
      } else if f.op.is_textual() {
        match &f.value {
          Json::String(s) => Value::Text(s.clone()),
          other => {
            return Err(Error::TypeCoercion {
              field:   field.name.clone(),
              message: format!("{} needs a string operand, got {other}", f.op),
            });
          }
        }
      } else {
        coerce_filter(field, &f.value)?
      };
      Ok(Condition {
        column: field.name.clone(),
        op: f.op,
        value,
      })
    })
    .collect()
}

fn as_object<'a>(data: &'a Json, what: &str) -> Result<&'a Map<String, Json>> {
  data.as_object().ok_or_else(|| Error::TypeCoercion {
    field:   what.to_owned(),
    message: "expected a JSON object".into(),
  })
}

/// A live field the caller is allowed to write.
fn writable<'a>(descriptor: &'a CompiledTypeDescriptor, key: &str) -> Result<&'a CompiledField> {
  let field = descriptor
    .live_field(key)
    .ok_or_else(|| Error::UnknownField { field: key.to_owned() })?;
  if field.primary_key || field.managed {
    return Err(Error::invalid(&field.name, "is managed by the engine and cannot be written"));
  }
  Ok(field)
}

/// Engine-filled values for a new row.
fn stamp_on_create(
  descriptor: &CompiledTypeDescriptor,
  field: &CompiledField,
  now: &Value,
  actor: Option<&str>,
) -> Option<Value> {
  if !field.managed {
    return None;
  }
  let caps = descriptor.capabilities;
  Some(match field.name.as_str() {
    IS_DELETED if caps.soft_delete => Value::Bool(false),
    VERSION if caps.versioned => Value::Integer(1),
    "CreatedAt" | "UpdatedAt" if caps.audited => now.clone(),
    "CreatedBy" | "UpdatedBy" if caps.audited => actor.map_or(Value::Null, |a| Value::Text(a.to_owned())),
    _ => return None,
  })
}

/// Every required field among `fields` must hold a non-null value.
fn require<'a>(
  fields: impl Iterator<Item = &'a CompiledField>,
  values: &Assignments,
  owner: Option<&str>,
) -> Result<()> {
  let errors: Vec<ValidationError> = fields
    .filter(|f| f.required && !f.primary_key)
    .filter(|f| {
      values
        .iter()
        .find(|(name, _)| *name == f.name)
        .is_none_or(|(_, v)| v.is_null())
    })
    .map(|f| ValidationError {
      property_path: owner.map_or_else(|| f.name.clone(), |o| format!("{o}.{}", f.name)),
      message:       "is required".into(),
    })
    .collect();
  if errors.is_empty() { Ok(()) } else { Err(Error::Validation(errors)) }
}

/// Coerce the rows of a collection. The foreign key is filled by the store.
fn child_rows(collection: &CompiledCollection, raw: &Json) -> Result<ChildRows> {
  let items = raw.as_array().ok_or_else(|| Error::TypeCoercion {
    field:   collection.name.clone(),
    message: "expected an array of objects".into(),
  })?;

  let mut rows = Vec::with_capacity(items.len());
  for (i, item) in items.iter().enumerate() {
    let owner = format!("{}[{i}]", collection.name);
    let object = as_object(item, &owner)?;
    let mut values = Assignments::new();
    for (key, raw) in object {
      let field = collection
        .live_fields()
        .find(|f| f.name.eq_ignore_ascii_case(key))
        .ok_or_else(|| Error::UnknownField {
          field: format!("{owner}.{key}"),
        })?;
      if field.primary_key || field.managed {
        return Err(Error::invalid(
          &format!("{owner}.{}", field.name),
          "is managed by the engine and cannot be written",
        ));
      }
      values.push((field.name.clone(), coerce(field, raw)?));
    }
    for field in collection.live_fields().filter(|f| !f.primary_key && !f.managed) {
      if values.iter().any(|(name, _)| *name == field.name) {
        continue;
      }
      if let Some(default) = &field.default_value {
        values.push((field.name.clone(), default.evaluate()));
      }
    }
    require(
      collection.live_fields().filter(|f| !f.managed),
      &values,
      Some(&owner),
    )?;
    rows.push(values);
  }

  Ok(ChildRows {
    table: collection.table_name.clone(),
    foreign_key: collection.foreign_key.clone(),
    rows,
  })
}
