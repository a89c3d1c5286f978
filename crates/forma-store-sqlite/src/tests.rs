//! Integration tests for `SqliteStore` against an in-memory database.

use forma_core::{
  cancel::{CancelSignal, cancellation},
  definition::{EntityDefinition, SubEntityDefinition},
  field::{FieldMetadata, FieldSource, FieldType},
  interface::InterfaceKind,
  query::{ColumnSpec, Condition, FilterOp, OrderBy, SelectSpec},
  row::{ChildRows, RowInsert, RowUpdate, VersionGuard},
  script::{DdlScript, DdlScriptStatus, DdlScriptType},
  store::EntityStore,
  value::Value,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn order() -> EntityDefinition {
  EntityDefinition::new("Sales", "Order")
    .with_field(FieldMetadata::new("Id", FieldType::Long).source(FieldSource::System))
    .with_field(FieldMetadata::string("Number", 32).required())
    .with_field(FieldMetadata::decimal("Total", 10, 2))
    .with_interface(InterfaceKind::Version)
    .with_sub_entity(
      SubEntityDefinition::new("Lines")
        .with_field(FieldMetadata::new("Quantity", FieldType::Integer).required()),
    )
}

const ORDERS_DDL: &str = r#"
CREATE TABLE "Orders" (
    "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "Number" VARCHAR(32) NOT NULL,
    "Total" NUMERIC(10,2),
    "Version" INTEGER NOT NULL DEFAULT 1
);
-- lines
CREATE TABLE "Orders_Lines" (
    "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "OrderId" INTEGER NOT NULL REFERENCES "Orders"("Id") ON DELETE CASCADE,
    "Quantity" INTEGER NOT NULL
);
"#;

/// Save `order()` and publish `ORDERS_DDL` for it.
async fn published_orders(s: &SqliteStore) -> EntityDefinition {
  let def = order();
  s.save_definition(def.clone()).await.unwrap();
  let script = DdlScript::pending(def.id, DdlScriptType::Create, ORDERS_DDL.into(), None);
  s.append_ddl_script(script.clone()).await.unwrap();
  let done = s
    .execute_ddl_script(script.id, def.clone(), CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(done.status, DdlScriptStatus::Executed, "{:?}", done.error_message);
  def
}

fn order_columns() -> Vec<ColumnSpec> {
  vec![
    ColumnSpec {
      name:       "Id".into(),
      field_type: FieldType::Long,
      scale:      None,
    },
    ColumnSpec {
      name:       "Number".into(),
      field_type: FieldType::String,
      scale:      None,
    },
    ColumnSpec {
      name:       "Total".into(),
      field_type: FieldType::Decimal,
      scale:      Some(2),
    },
    ColumnSpec {
      name:       "Version".into(),
      field_type: FieldType::Integer,
      scale:      None,
    },
  ]
}

fn all(conditions: Vec<Condition>) -> SelectSpec {
  SelectSpec {
    columns: Some(order_columns()),
    conditions,
    order_by: Some(OrderBy {
      column:     "Id".into(),
      descending: false,
    }),
    skip: 0,
    take: 100,
  }
}

fn new_order(number: &str, total: i64) -> RowInsert {
  RowInsert {
    values:   vec![
      ("Number".into(), Value::Text(number.into())),
      ("Total".into(), Value::Decimal(Decimal::new(total, 2))),
    ],
    children: Vec::new(),
  }
}

// ─── Definitions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn save_and_get_definition() {
  let s = store().await;
  let def = order();
  s.save_definition(def.clone()).await.unwrap();

  let fetched = s.get_definition(def.id).await.unwrap().expect("saved");
  assert_eq!(fetched.full_type_name(), "Sales.Order");
  assert_eq!(fetched.fields.len(), 3);
  assert_eq!(fetched.fields[1].property_name, "Number");
  assert_eq!(fetched.fields[1].length, Some(32));
  assert_eq!(fetched.fields[0].source, FieldSource::System);
  assert_eq!(fetched.interfaces[0].kind, InterfaceKind::Version);
  assert_eq!(fetched.sub_entities.len(), 1);
  assert_eq!(fetched.sub_entities[0].fields[0].property_name, "Quantity");
  assert_eq!(fetched.display_name, def.display_name);
}

#[tokio::test]
async fn saving_again_replaces_children() {
  let s = store().await;
  let mut def = order();
  s.save_definition(def.clone()).await.unwrap();

  def.fields.pop();
  def.sub_entities.clear();
  def.revision = 4;
  s.save_definition(def.clone()).await.unwrap();

  let fetched = s.get_definition(def.id).await.unwrap().unwrap();
  assert_eq!(fetched.fields.len(), 2);
  assert!(fetched.sub_entities.is_empty());
  assert_eq!(fetched.revision, 4);
  assert_eq!(s.list_definitions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn find_definition_ignores_case() {
  let s = store().await;
  s.save_definition(order()).await.unwrap();
  let found = s
    .find_definition("sales".into(), "ORDER".into())
    .await
    .unwrap();
  assert!(found.is_some());
  assert!(s.get_definition(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── DDL scripts ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn executed_script_commits_table_and_definition() {
  let s = store().await;
  let mut def = order();
  s.save_definition(def.clone()).await.unwrap();

  let script = DdlScript::pending(def.id, DdlScriptType::Create, ORDERS_DDL.into(), Some("ops"));
  s.append_ddl_script(script.clone()).await.unwrap();

  def.revision = 1;
  def.is_locked = true;
  let done = s
    .execute_ddl_script(script.id, def.clone(), CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(done.status, DdlScriptStatus::Executed);
  assert!(done.executed_at.is_some());

  let columns = s.table_columns("Orders".into()).await.unwrap().unwrap();
  assert_eq!(columns.len(), 4);
  assert!(columns[0].primary_key);
  assert!(s.table_columns("Orders_Lines".into()).await.unwrap().is_some());

  let stored = s.get_definition(def.id).await.unwrap().unwrap();
  assert_eq!(stored.revision, 1);
  assert!(stored.is_locked);
}

#[tokio::test]
async fn failed_script_rolls_back_and_keeps_definition() {
  let s = store().await;
  let def = order();
  s.save_definition(def.clone()).await.unwrap();

  let bad = "CREATE TABLE \"Orders\" (\"Id\" INTEGER PRIMARY KEY);\nCREATE TABLE oops (;";
  let script = DdlScript::pending(def.id, DdlScriptType::Create, bad.into(), None);
  s.append_ddl_script(script.clone()).await.unwrap();

  let mut after = def.clone();
  after.revision = 1;
  let done = s
    .execute_ddl_script(script.id, after, CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(done.status, DdlScriptStatus::Failed);
  assert!(done.error_message.is_some());

  // The first statement ran before the failure and was rolled back.
  assert!(s.table_columns("Orders".into()).await.unwrap().is_none());
  assert_eq!(s.get_definition(def.id).await.unwrap().unwrap().revision, 0);
}

#[tokio::test]
async fn cancelled_script_is_recorded_as_failed() {
  let s = store().await;
  let def = order();
  s.save_definition(def.clone()).await.unwrap();
  let script = DdlScript::pending(def.id, DdlScriptType::Create, ORDERS_DDL.into(), None);
  s.append_ddl_script(script.clone()).await.unwrap();

  let (handle, signal) = cancellation();
  handle.cancel();
  let done = s
    .execute_ddl_script(script.id, def.clone(), signal)
    .await
    .unwrap();
  assert_eq!(done.status, DdlScriptStatus::Failed);
  assert!(s.table_columns("Orders".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn terminal_scripts_are_not_rerun() {
  let s = store().await;
  let def = published_orders(&s).await;
  let history = s.ddl_history(def.id).await.unwrap();

  let err = s
    .execute_ddl_script(history[0].id, def, CancelSignal::never())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ScriptNotPending(_)));

  let err = s
    .execute_ddl_script(Uuid::new_v4(), order(), CancelSignal::never())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ScriptNotFound(_)));
}

#[tokio::test]
async fn history_is_newest_first() {
  let s = store().await;
  let def = published_orders(&s).await;
  let alter = DdlScript::pending(
    def.id,
    DdlScriptType::Alter,
    "ALTER TABLE \"Orders\" ADD COLUMN \"Note\" TEXT;".into(),
    None,
  );
  s.append_ddl_script(alter.clone()).await.unwrap();

  let history = s.ddl_history(def.id).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].id, alter.id);
  assert_eq!(history[0].status, DdlScriptStatus::Pending);
  assert_eq!(history[1].script_type, DdlScriptType::Create);
}

// ─── Rows ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_select_typed_rows() {
  let s = store().await;
  published_orders(&s).await;

  let id = s
    .insert_row("Orders".into(), new_order("SO-1", 1250), CancelSignal::never())
    .await
    .unwrap();
  assert!(id > 0);

  let rows = s
    .select_rows("Orders".into(), all(vec![Condition::eq("Id", Value::Integer(id))]))
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0]["Number"], Value::Text("SO-1".into()));
  assert_eq!(rows[0]["Total"], Value::Decimal(Decimal::new(1250, 2)));
  assert_eq!(rows[0]["Version"], Value::Integer(1));
}

#[tokio::test]
async fn filters_paging_and_count() {
  let s = store().await;
  published_orders(&s).await;
  for (n, total) in [("SO-1", 500), ("SO-2", 1500), ("PO-3", 2500)] {
    s.insert_row("Orders".into(), new_order(n, total), CancelSignal::never())
      .await
      .unwrap();
  }

  let so = vec![Condition {
    column: "Number".into(),
    op:     FilterOp::StartsWith,
    value:  Value::Text("SO-".into()),
  }];
  assert_eq!(s.count_rows("Orders".into(), so.clone()).await.unwrap(), 2);

  let expensive = vec![Condition {
    column: "Total".into(),
    op:     FilterOp::Gt,
    value:  Value::Decimal(Decimal::new(1000, 2)),
  }];
  assert_eq!(s.count_rows("Orders".into(), expensive).await.unwrap(), 2);

  let mut page = all(Vec::new());
  page.order_by = Some(OrderBy {
    column:     "Total".into(),
    descending: true,
  });
  page.skip = 1;
  page.take = 1;
  let rows = s.select_rows("Orders".into(), page).await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0]["Number"], Value::Text("SO-2".into()));
}

#[tokio::test]
async fn guarded_update_checks_and_bumps_version() {
  let s = store().await;
  published_orders(&s).await;
  let id = s
    .insert_row("Orders".into(), new_order("SO-1", 100), CancelSignal::never())
    .await
    .unwrap();

  let patch = |expected| RowUpdate {
    id,
    values: vec![("Number".into(), Value::Text("SO-1b".into()))],
    guard: Some(VersionGuard {
      column: "Version".into(),
      expected,
    }),
    conditions: Vec::new(),
    children: Vec::new(),
  };

  let n = s
    .update_row("Orders".into(), patch(1), CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(n, 1);
  let stale = s
    .update_row("Orders".into(), patch(1), CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(stale, 0);

  let rows = s.select_rows("Orders".into(), all(Vec::new())).await.unwrap();
  assert_eq!(rows[0]["Version"], Value::Integer(2));
  assert_eq!(rows[0]["Number"], Value::Text("SO-1b".into()));
}

#[tokio::test]
async fn children_are_written_and_replaced_with_parent() {
  let s = store().await;
  published_orders(&s).await;

  let lines = |quantities: &[i64]| ChildRows {
    table:       "Orders_Lines".into(),
    foreign_key: "OrderId".into(),
    rows:        quantities
      .iter()
      .map(|q| vec![("Quantity".to_string(), Value::Integer(*q))])
      .collect(),
  };

  let mut insert = new_order("SO-1", 100);
  insert.children.push(lines(&[1, 2, 3]));
  let id = s
    .insert_row("Orders".into(), insert, CancelSignal::never())
    .await
    .unwrap();
  let by_order = vec![Condition::eq("OrderId", Value::Integer(id))];
  assert_eq!(s.count_rows("Orders_Lines".into(), by_order.clone()).await.unwrap(), 3);

  let update = RowUpdate {
    id,
    values: Vec::new(),
    guard: None,
    conditions: Vec::new(),
    children: vec![lines(&[9])],
  };
  s.update_row("Orders".into(), update, CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(s.count_rows("Orders_Lines".into(), by_order.clone()).await.unwrap(), 1);

  // Children cascade with a hard delete.
  assert_eq!(s.delete_row("Orders".into(), id, CancelSignal::never()).await.unwrap(), 1);
  assert_eq!(s.count_rows("Orders_Lines".into(), by_order).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_writes_do_nothing() {
  let s = store().await;
  published_orders(&s).await;
  let (handle, signal) = cancellation();
  handle.cancel();

  let err = s
    .insert_row("Orders".into(), new_order("SO-1", 100), signal)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Cancelled));
  assert_eq!(s.count_rows("Orders".into(), Vec::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn untyped_select_decodes_by_storage_class() {
  let s = store().await;
  published_orders(&s).await;
  s.insert_row("Orders".into(), new_order("SO-1", 100), CancelSignal::never())
    .await
    .unwrap();

  let rows = s
    .select_rows("Orders".into(), SelectSpec {
      columns:    None,
      conditions: Vec::new(),
      order_by:   None,
      skip:       0,
      take:       10,
    })
    .await
    .unwrap();
  assert_eq!(rows[0]["Id"], Value::Integer(1));
  assert_eq!(rows[0]["Number"], Value::Text("SO-1".into()));
  assert!(s.table_columns("Missing".into()).await.unwrap().is_none());
}
