//! [`SqliteStore`]: the SQLite implementation of [`EntityStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use forma_core::{
  cancel::CancelSignal,
  compile::PRIMARY_KEY,
  definition::EntityDefinition,
  query::{Condition, SelectSpec, TableColumn},
  row::{ChildRows, Row, RowInsert, RowUpdate},
  script::{DdlScript, DdlScriptStatus},
  store::EntityStore,
};

use crate::{
  Error, Result,
  encode::{
    DEFINITION_COLUMNS, RawDefinition, RawScript, SCRIPT_COLUMNS, encode_dt, encode_uuid,
    from_sql, from_sql_loose, write_definition,
  },
  schema::SCHEMA,
  sql,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Forma store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Outcome of a closure that may stop early without a database error.
enum Step<T> {
  Done(T),
  Cancelled,
}

impl<T> Step<T> {
  fn into_result(self) -> Result<T> {
    match self {
      Self::Done(v) => Ok(v),
      Self::Cancelled => Err(Error::Cancelled),
    }
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Load definitions matching `filter` (a `WHERE` clause over
  /// `entity_definitions`) with their children.
  async fn load_definitions(
    &self,
    filter: &'static str,
    params: Vec<String>,
  ) -> Result<Vec<EntityDefinition>> {
    let raws: Vec<RawDefinition> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {DEFINITION_COLUMNS} FROM entity_definitions {filter}
           ORDER BY namespace, entity_name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut raws = stmt
          .query_map(rusqlite::params_from_iter(params), RawDefinition::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        for raw in &mut raws {
          raw.load_children(conn)?;
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawDefinition::into_definition).collect()
  }
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

fn execute(conn: &rusqlite::Connection, stmt: &sql::Statement) -> rusqlite::Result<usize> {
  conn.execute(&stmt.sql, rusqlite::params_from_iter(stmt.params.iter()))
}

fn insert_children(
  conn: &rusqlite::Connection,
  parent_id: i64,
  children: &[ChildRows],
  cancel: &CancelSignal,
) -> rusqlite::Result<Step<()>> {
  for set in children {
    for row in &set.rows {
      if cancel.is_cancelled() {
        return Ok(Step::Cancelled);
      }
      let mut values = row.clone();
      values.retain(|(c, _)| !c.eq_ignore_ascii_case(&set.foreign_key));
      values.push((set.foreign_key.clone(), forma_core::value::Value::Integer(parent_id)));
      execute(conn, &sql::insert(&set.table, &values))?;
    }
  }
  Ok(Step::Done(()))
}

/// Run every statement of `script`, then commit `definition` and mark the
/// record executed, all in one transaction. Foreign key enforcement is off
/// while the script runs so tables can be rebuilt; violations are checked
/// before commit.
fn run_script(
  conn: &mut rusqlite::Connection,
  script_id: &str,
  script: &str,
  definition: &EntityDefinition,
  cancel: &CancelSignal,
) -> std::result::Result<(), String> {
  let tx = conn.transaction().map_err(|e| e.to_string())?;

  let mut batch = rusqlite::Batch::new(&tx, script);
  while let Some(mut stmt) = batch.next().map_err(|e| e.to_string())? {
    if cancel.is_cancelled() {
      return Err("cancelled".to_owned());
    }
    stmt.execute([]).map_err(|e| e.to_string())?;
  }
  drop(batch);

  let violations: i64 = tx
    .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |r| r.get(0))
    .map_err(|e| e.to_string())?;
  if violations > 0 {
    return Err(format!("{violations} foreign key violation(s) after script"));
  }

  if cancel.is_cancelled() {
    return Err("cancelled".to_owned());
  }

  write_definition(&tx, definition).map_err(|e| e.to_string())?;
  tx.execute(
    "UPDATE ddl_scripts SET status = ?1, executed_at = ?2 WHERE script_id = ?3",
    rusqlite::params![
      DdlScriptStatus::Executed.to_string(),
      encode_dt(Utc::now()),
      script_id
    ],
  )
  .map_err(|e| e.to_string())?;

  tx.commit().map_err(|e| e.to_string())
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

impl EntityStore for SqliteStore {
  type Error = Error;

  // ── Definitions ───────────────────────────────────────────────────────────

  async fn save_definition(&self, definition: EntityDefinition) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        write_definition(&tx, &definition)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_definition(&self, id: Uuid) -> Result<Option<EntityDefinition>> {
    let found = self
      .load_definitions("WHERE definition_id = ?1", vec![encode_uuid(id)])
      .await?;
    Ok(found.into_iter().next())
  }

  async fn find_definition(
    &self,
    namespace: String,
    entity_name: String,
  ) -> Result<Option<EntityDefinition>> {
    let found = self
      .load_definitions(
        "WHERE namespace = ?1 COLLATE NOCASE AND entity_name = ?2 COLLATE NOCASE",
        vec![namespace, entity_name],
      )
      .await?;
    Ok(found.into_iter().next())
  }

  async fn list_definitions(&self) -> Result<Vec<EntityDefinition>> {
    self.load_definitions("", Vec::new()).await
  }

  // ── DDL history ───────────────────────────────────────────────────────────

  async fn append_ddl_script(&self, script: DdlScript) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO ddl_scripts (
             script_id, definition_id, script_type, script, status,
             created_at, created_by, executed_at, error_message
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            encode_uuid(script.id),
            encode_uuid(script.definition_id),
            script.script_type.to_string(),
            script.script,
            script.status.to_string(),
            encode_dt(script.created_at),
            script.created_by,
            script.executed_at.map(encode_dt),
            script.error_message,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn execute_ddl_script(
    &self,
    script_id: Uuid,
    definition: EntityDefinition,
    cancel: CancelSignal,
  ) -> Result<DdlScript> {
    let id_str = encode_uuid(script_id);

    let found: Option<(bool, RawScript)> = self
      .conn
      .call(move |conn| {
        let lookup = format!("SELECT {SCRIPT_COLUMNS} FROM ddl_scripts WHERE script_id = ?1");
        let Some(raw) = conn
          .query_row(&lookup, [&id_str], RawScript::from_row)
          .optional()?
        else {
          return Ok(None);
        };
        if raw.status != DdlScriptStatus::Pending.to_string() {
          return Ok(Some((false, raw)));
        }

        // Has no effect inside a transaction, so it brackets the whole run.
        conn.execute_batch("PRAGMA foreign_keys = OFF")?;
        let outcome = run_script(conn, &id_str, &raw.script, &definition, &cancel);
        conn.execute_batch("PRAGMA foreign_keys = ON")?;

        if let Err(message) = outcome {
          conn.execute(
            "UPDATE ddl_scripts SET status = ?1, executed_at = ?2, error_message = ?3
             WHERE script_id = ?4",
            rusqlite::params![
              DdlScriptStatus::Failed.to_string(),
              encode_dt(Utc::now()),
              message,
              id_str
            ],
          )?;
        }
        let done = conn.query_row(&lookup, [&id_str], RawScript::from_row)?;
        Ok(Some((true, done)))
      })
      .await?;

    let (ran, raw) = found.ok_or(Error::ScriptNotFound(script_id))?;
    if !ran {
      return Err(Error::ScriptNotPending(script_id));
    }
    let script = raw.into_script()?;
    match &script.error_message {
      None => tracing::info!(%script_id, "ddl script executed"),
      Some(error) => tracing::warn!(%script_id, %error, "ddl script failed"),
    }
    Ok(script)
  }

  async fn ddl_history(&self, definition_id: Uuid) -> Result<Vec<DdlScript>> {
    let id_str = encode_uuid(definition_id);

    let raws: Vec<RawScript> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SCRIPT_COLUMNS} FROM ddl_scripts WHERE definition_id = ?1
           ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
          .query_map([&id_str], RawScript::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScript::into_script).collect()
  }

  // ── Live tables ───────────────────────────────────────────────────────────

  async fn table_columns(&self, table: String) -> Result<Option<Vec<TableColumn>>> {
    let columns: Vec<TableColumn> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
        let rows = stmt
          .query_map([&table], |row| {
            Ok(TableColumn {
              name:          row.get(0)?,
              declared_type: row.get(1)?,
              not_null:      row.get(2)?,
              primary_key:   row.get::<_, i64>(3)? > 0,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    // Tables always have at least one column.
    Ok((!columns.is_empty()).then_some(columns))
  }

  async fn select_rows(&self, table: String, spec: SelectSpec) -> Result<Vec<Row>> {
    let stmt = sql::select(&table, &spec);

    let raws: Vec<Vec<(String, rusqlite::types::Value)>> = self
      .conn
      .call(move |conn| {
        let mut prepared = conn.prepare(&stmt.sql)?;
        let names: Vec<String> = prepared
          .column_names()
          .into_iter()
          .map(str::to_owned)
          .collect();
        let rows = prepared
          .query_map(rusqlite::params_from_iter(stmt.params.iter()), |row| {
            names
              .iter()
              .enumerate()
              .map(|(i, name)| Ok((name.clone(), row.get::<_, rusqlite::types::Value>(i)?)))
              .collect::<rusqlite::Result<Vec<_>>>()
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|cells| match &spec.columns {
        Some(columns) => columns
          .iter()
          .zip(cells)
          .map(|(column, (_, raw))| Ok((column.name.clone(), from_sql(raw, column)?)))
          .collect::<Result<Row>>(),
        None => Ok(
          cells
            .into_iter()
            .map(|(name, raw)| (name, from_sql_loose(raw)))
            .collect(),
        ),
      })
      .collect()
  }

  async fn count_rows(&self, table: String, conditions: Vec<Condition>) -> Result<u64> {
    let stmt = sql::count(&table, &conditions);
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &stmt.sql,
          rusqlite::params_from_iter(stmt.params.iter()),
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(u64::try_from(n).unwrap_or_default())
  }

  async fn insert_row(&self, table: String, insert: RowInsert, cancel: CancelSignal) -> Result<i64> {
    let stmt = sql::insert(&table, &insert.values);

    let step = self
      .conn
      .call(move |conn| {
        if cancel.is_cancelled() {
          return Ok(Step::Cancelled);
        }
        let tx = conn.transaction()?;
        execute(&tx, &stmt)?;
        let id = tx.last_insert_rowid();
        if let Step::Cancelled = insert_children(&tx, id, &insert.children, &cancel)? {
          return Ok(Step::Cancelled);
        }
        if cancel.is_cancelled() {
          return Ok(Step::Cancelled);
        }
        tx.commit()?;
        Ok(Step::Done(id))
      })
      .await?;
    step.into_result()
  }

  async fn update_row(&self, table: String, update: RowUpdate, cancel: CancelSignal) -> Result<u64> {
    let stmt = sql::update(&table, &update);

    let step = self
      .conn
      .call(move |conn| {
        if cancel.is_cancelled() {
          return Ok(Step::Cancelled);
        }
        let tx = conn.transaction()?;
        let affected = execute(&tx, &stmt)?;
        if affected > 0 {
          for set in &update.children {
            tx.execute(
              &format!(
                "DELETE FROM {} WHERE {} = ?1",
                forma_core::ddl::quote(&set.table),
                forma_core::ddl::quote(&set.foreign_key)
              ),
              [update.id],
            )?;
          }
          if let Step::Cancelled = insert_children(&tx, update.id, &update.children, &cancel)? {
            return Ok(Step::Cancelled);
          }
        }
        if cancel.is_cancelled() {
          return Ok(Step::Cancelled);
        }
        tx.commit()?;
        Ok(Step::Done(affected as u64))
      })
      .await?;
    step.into_result()
  }

  async fn delete_row(&self, table: String, id: i64, cancel: CancelSignal) -> Result<u64> {
    let step = self
      .conn
      .call(move |conn| {
        if cancel.is_cancelled() {
          return Ok(Step::Cancelled);
        }
        let removed = conn.execute(
          &format!(
            "DELETE FROM {} WHERE {} = ?1",
            forma_core::ddl::quote(&table),
            forma_core::ddl::quote(PRIMARY_KEY)
          ),
          [id],
        )?;
        Ok(Step::Done(removed as u64))
      })
      .await?;
    step.into_result()
  }
}
