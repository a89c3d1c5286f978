//! Schema publishing: turn definitions into physical tables.
//!
//! Every execution goes through the DDL history. A `Pending` record is
//! appended first; the store then runs the script, writes the published
//! definition and marks the record `Executed` in one transaction, or rolls
//! all of it back and marks the record `Failed`.
//!
//! One publish runs per definition id at a time.

use chrono::Utc;
use forma_core::{
  cancel::CancelSignal,
  compile::CompiledTypeDescriptor,
  ddl,
  definition::{DefinitionStatus, EntityDefinition},
  schema::{AppliedSchema, ChangeAnalysis, analyze_changes},
  script::{DdlHistoryEntry, DdlScript, DdlScriptStatus, DdlScriptType},
  store::EntityStore,
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  engine::Engine,
  error::{Error, Result},
};

/// Outcome of a successful publish.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
  /// The definition as stored after the publish.
  pub definition: EntityDefinition,
  /// The executed history record.
  pub script:     DdlScript,
  /// What changed, for incremental publishes.
  pub changes:    Option<ChangeAnalysis>,
}

impl<S: EntityStore> Engine<S> {
  // ─── PublishNew ────────────────────────────────────────────────────────────

  /// Create the tables of a `Draft` definition and lock it.
  pub async fn publish_new(
    &self,
    id: Uuid,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<PublishResult> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let _guard = self.locks.lock(id).await;

    let definition = self.require_definition(id).await?;
    if definition.status != DefinitionStatus::Draft {
      return Err(Error::InvalidState(format!(
        "{} is {}; only draft definitions can be published as new",
        definition.full_type_name(),
        definition.status
      )));
    }
    self.revalidate(&definition).await?;

    let descriptor = self.compile_definition(&definition).await?;
    for table in tables(&descriptor) {
      let exists = self
        .store
        .table_columns(table.to_owned())
        .await
        .map_err(Error::store)?
        .is_some();
      if exists {
        return Err(Error::InvalidState(format!("table {table} already exists")));
      }
    }

    let script = ddl::create_script(&descriptor, self.localizer(), &self.config.default_locale);
    let after = published_state(&definition, &descriptor, actor);
    self
      .execute(definition, after, DdlScriptType::Create, script, None, actor, cancel)
      .await
  }

  // ─── PublishChanges ────────────────────────────────────────────────────────

  /// Apply the additive edits of a `Modified` definition.
  ///
  /// Destructive edits are refused before anything is recorded.
  pub async fn publish_changes(
    &self,
    id: Uuid,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<PublishResult> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    let _guard = self.locks.lock(id).await;

    let definition = self.require_definition(id).await?;
    match definition.status {
      DefinitionStatus::Modified if definition.is_locked => {}
      DefinitionStatus::Published => return Err(Error::NothingToPublish),
      status => {
        return Err(Error::InvalidState(format!(
          "{} is {status}; only modified published definitions can publish changes",
          definition.full_type_name()
        )));
      }
    }
    self.revalidate(&definition).await?;

    let descriptor = self.compile_definition(&definition).await?;
    let applied = definition.applied_schema.clone().unwrap_or_default();
    let analysis = analyze_changes(&applied, &AppliedSchema::target(&descriptor));
    if analysis.has_destructive_changes() {
      info!(
        definition = %definition.full_type_name(),
        changes = analysis.destructive.len(),
        "publish refused: destructive changes"
      );
      return Err(Error::DestructiveChange(Box::new(analysis)));
    }
    if analysis.is_empty() {
      return Err(Error::NothingToPublish);
    }

    let script = ddl::alter_script(
      &descriptor,
      &applied,
      &analysis,
      self.localizer(),
      &self.config.default_locale,
    );
    let after = published_state(&definition, &descriptor, actor);
    self
      .execute(definition, after, DdlScriptType::Alter, script, Some(analysis), actor, cancel)
      .await
  }

  // ─── Preview and history ───────────────────────────────────────────────────

  /// The script the next publish would run. Nothing is executed or
  /// recorded. Destructive edits appear as comments.
  pub async fn preview_ddl(&self, id: Uuid) -> Result<String> {
    let definition = self.require_definition(id).await?;
    let descriptor = self.compile_definition(&definition).await?;
    let locale = &self.config.default_locale;
    Ok(match definition.status {
      DefinitionStatus::Draft => ddl::create_script(&descriptor, self.localizer(), locale),
      DefinitionStatus::Published | DefinitionStatus::Modified => {
        let applied = definition.applied_schema.clone().unwrap_or_default();
        let analysis = analyze_changes(&applied, &AppliedSchema::target(&descriptor));
        ddl::alter_script(&descriptor, &applied, &analysis, self.localizer(), locale)
      }
    })
  }

  /// Every history record of a definition, newest first.
  pub async fn ddl_history(&self, id: Uuid) -> Result<Vec<DdlHistoryEntry>> {
    self.require_definition(id).await?;
    let scripts = self.store.ddl_history(id).await.map_err(Error::store)?;
    Ok(
      scripts
        .iter()
        .map(|s| DdlHistoryEntry::of(s, self.config.history_preview_chars))
        .collect(),
    )
  }

  // ─── Execution ─────────────────────────────────────────────────────────────

  #[allow(clippy::too_many_arguments)]
  async fn execute(
    &self,
    before: EntityDefinition,
    after: EntityDefinition,
    script_type: DdlScriptType,
    script: String,
    changes: Option<ChangeAnalysis>,
    actor: Option<&str>,
    cancel: CancelSignal,
  ) -> Result<PublishResult> {
    debug!(definition = %before.full_type_name(), %script_type, sql = %script, "executing ddl");
    let record = DdlScript::pending(before.id, script_type, script, actor);
    let script_id = record.id;
    self
      .store
      .append_ddl_script(record)
      .await
      .map_err(Error::store)?;

    let outcome = self
      .store
      .execute_ddl_script(script_id, after.clone(), cancel.clone())
      .await
      .map_err(Error::store)?;
    self.audit.ddl_recorded(&outcome);

    match outcome.status {
      DdlScriptStatus::Executed => {
        self.cache.invalidate(after.id);
        info!(
          definition = %after.full_type_name(),
          revision = after.revision,
          script = %script_id,
          "published"
        );
        self.audit.definition_changed(actor, Some(&before), &after);
        Ok(PublishResult {
          definition: after,
          script: outcome,
          changes,
        })
      }
      _ if cancel.is_cancelled() => Err(Error::Cancelled),
      _ => Err(Error::DdlExecution {
        script_id,
        message: outcome.error_message.unwrap_or_default(),
      }),
    }
  }
}

fn tables(descriptor: &CompiledTypeDescriptor) -> impl Iterator<Item = &str> {
  std::iter::once(descriptor.table_name.as_str())
    .chain(descriptor.collections.iter().map(|c| c.table_name.as_str()))
}

/// The definition as it will be stored once its script has run: locked,
/// one revision further, every present field, sub-entity and enabled
/// interface stamped as physical, and the applied column snapshot taken.
fn published_state(
  definition: &EntityDefinition,
  descriptor: &CompiledTypeDescriptor,
  actor: Option<&str>,
) -> EntityDefinition {
  let revision = definition.revision + 1;
  let mut after = definition.clone();
  after.status = DefinitionStatus::Published;
  after.is_locked = true;
  after.revision = revision;
  after.applied_schema = Some(AppliedSchema::published(
    descriptor,
    definition.applied_schema.as_ref(),
  ));
  after.updated_at = Utc::now();
  after.updated_by = actor.map(str::to_owned);

  for interface in after.interfaces.iter_mut().filter(|i| i.is_enabled) {
    interface.is_locked = true;
  }
  for field in after.fields.iter_mut().filter(|f| !f.is_deleted) {
    field.published_revision.get_or_insert(revision);
  }
  for sub in &mut after.sub_entities {
    sub.published_revision.get_or_insert(revision);
    for field in sub.fields.iter_mut().filter(|f| !f.is_deleted) {
      field.published_revision.get_or_insert(revision);
    }
  }
  after
}
