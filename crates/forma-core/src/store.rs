//! The `EntityStore` trait.
//!
//! A store persists definition aggregates and DDL history, executes DDL
//! scripts atomically with the definition state change they imply, and
//! reads and writes rows of the live tables. The engine depends on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  cancel::CancelSignal,
  definition::EntityDefinition,
  query::{Condition, SelectSpec, TableColumn},
  row::{Row, RowInsert, RowUpdate},
  script::DdlScript,
};

/// Abstraction over a Forma storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait EntityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Definitions ───────────────────────────────────────────────────────

  /// Insert or replace a definition aggregate (fields, interfaces and
  /// sub-entities included) in one transaction.
  fn save_definition(
    &self,
    definition: EntityDefinition,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_definition(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<EntityDefinition>, Self::Error>> + Send + '_;

  fn find_definition(
    &self,
    namespace: String,
    entity_name: String,
  ) -> impl Future<Output = Result<Option<EntityDefinition>, Self::Error>> + Send + '_;

  fn list_definitions(
    &self,
  ) -> impl Future<Output = Result<Vec<EntityDefinition>, Self::Error>> + Send + '_;

  // ── DDL history ───────────────────────────────────────────────────────

  /// Append a `Pending` record.
  fn append_ddl_script(
    &self,
    script: DdlScript,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Execute the text of a pending record. On success the script, the
  /// replacement `definition` and the `Executed` mark commit together. On
  /// failure or cancellation everything rolls back and the record becomes
  /// `Failed`. Returns the record in its terminal state.
  fn execute_ddl_script(
    &self,
    script_id: Uuid,
    definition: EntityDefinition,
    cancel: CancelSignal,
  ) -> impl Future<Output = Result<DdlScript, Self::Error>> + Send + '_;

  /// All records for a definition, newest first.
  fn ddl_history(
    &self,
    definition_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DdlScript>, Self::Error>> + Send + '_;

  // ── Live tables ───────────────────────────────────────────────────────

  /// Columns of a table, or `None` if it does not exist.
  fn table_columns(
    &self,
    table: String,
  ) -> impl Future<Output = Result<Option<Vec<TableColumn>>, Self::Error>> + Send + '_;

  fn select_rows(
    &self,
    table: String,
    spec: SelectSpec,
  ) -> impl Future<Output = Result<Vec<Row>, Self::Error>> + Send + '_;

  fn count_rows(
    &self,
    table: String,
    conditions: Vec<Condition>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Insert a row and its children in one transaction; returns the new id.
  fn insert_row(
    &self,
    table: String,
    insert: RowInsert,
    cancel: CancelSignal,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Conditional update; returns the number of rows affected (0 or 1).
  /// Children are only replaced when the row itself was updated.
  fn update_row(
    &self,
    table: String,
    update: RowUpdate,
    cancel: CancelSignal,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Hard delete; returns the number of rows removed.
  fn delete_row(
    &self,
    table: String,
    id: i64,
    cancel: CancelSignal,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
