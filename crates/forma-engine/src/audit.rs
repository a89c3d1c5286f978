//! Default audit sink: structured log lines.

use forma_core::{
  collab::AuditSink,
  Error,
  definition::EntityDefinition,
  script::{DdlScript, DdlScriptStatus},
};
use tracing::{info, warn};

/// Writes every audited event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
  fn definition_changed(
    &self,
    actor: Option<&str>,
    before: Option<&EntityDefinition>,
    after: &EntityDefinition,
  ) {
    info!(
      definition = %after.full_type_name(),
      id = %after.id,
      actor = actor.unwrap_or("-"),
      from = %before.map_or_else(|| "-".to_owned(), |b| b.status.to_string()),
      to = %after.status,
      revision = after.revision,
      "definition changed"
    );
  }

  fn ddl_recorded(&self, script: &DdlScript) {
    match script.status {
      DdlScriptStatus::Failed => warn!(
        script = %script.id,
        definition = %script.definition_id,
        kind = %script.script_type,
        error = script.error_message.as_deref().unwrap_or(""),
        "ddl script failed"
      ),
      status => info!(
        script = %script.id,
        definition = %script.definition_id,
        kind = %script.script_type,
        %status,
        "ddl script recorded"
      ),
    }
  }

  fn compile_failed(&self, definition: &EntityDefinition, error: &Error) {
    warn!(
      definition = %definition.full_type_name(),
      id = %definition.id,
      revision = definition.revision,
      %error,
      "definition failed to compile"
    );
  }
}
