//! Engine tunables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Page size when a query names none.
  pub default_take:          u64,
  /// Upper bound on any requested page size.
  pub max_take:              u64,
  /// Characters of script text kept in history entries.
  pub history_preview_chars: usize,
  /// Locale used for labels in generated DDL comments.
  pub default_locale:        String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      default_take:          100,
      max_take:              1000,
      history_preview_chars: 200,
      default_locale:        "en".into(),
    }
  }
}

impl EngineConfig {
  /// The page size to use for a request.
  pub fn take(&self, requested: Option<u64>) -> u64 {
    requested
      .unwrap_or(self.default_take)
      .min(self.max_take)
  }
}
