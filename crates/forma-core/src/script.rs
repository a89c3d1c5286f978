//! DDL history records.
//!
//! A record is written `Pending` before its script runs and moves to
//! `Executed` or `Failed` exactly once. Records are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DdlScriptType {
  Create,
  Alter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DdlScriptStatus {
  Pending,
  Executed,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlScript {
  pub id:            Uuid,
  pub definition_id: Uuid,
  pub script_type:   DdlScriptType,
  pub script:        String,
  pub status:        DdlScriptStatus,
  pub created_at:    DateTime<Utc>,
  pub created_by:    Option<String>,
  pub executed_at:   Option<DateTime<Utc>>,
  pub error_message: Option<String>,
}

impl DdlScript {
  pub fn pending(
    definition_id: Uuid,
    script_type: DdlScriptType,
    script: String,
    actor: Option<&str>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      definition_id,
      script_type,
      script,
      status: DdlScriptStatus::Pending,
      created_at: Utc::now(),
      created_by: actor.map(str::to_owned),
      executed_at: None,
      error_message: None,
    }
  }

  /// The first `max_chars` characters, with an ellipsis when cut.
  pub fn preview(&self, max_chars: usize) -> String {
    let mut chars = self.script.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
  }
}

/// A history entry as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlHistoryEntry {
  pub id:             Uuid,
  pub script_type:    DdlScriptType,
  pub status:         DdlScriptStatus,
  pub created_at:     DateTime<Utc>,
  pub created_by:     Option<String>,
  pub executed_at:    Option<DateTime<Utc>>,
  pub error_message:  Option<String>,
  pub script_preview: String,
}

impl DdlHistoryEntry {
  pub fn of(script: &DdlScript, preview_chars: usize) -> Self {
    Self {
      id:             script.id,
      script_type:    script.script_type,
      status:         script.status,
      created_at:     script.created_at,
      created_by:     script.created_by.clone(),
      executed_at:    script.executed_at,
      error_message:  script.error_message.clone(),
      script_preview: script.preview(preview_chars),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn preview_truncates_on_char_boundaries() {
    let s = DdlScript::pending(Uuid::nil(), DdlScriptType::Create, "CRÉATE TABLE".into(), None);
    assert_eq!(s.preview(3), "CRÉ…");
    assert_eq!(s.preview(100), "CRÉATE TABLE");
    assert_eq!(s.status, DdlScriptStatus::Pending);
  }
}
