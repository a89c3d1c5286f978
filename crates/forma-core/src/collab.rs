//! Interfaces to external collaborators: label localization and audit.

use crate::{
  definition::{EntityDefinition, LocalizedText},
  error::Error,
  script::DdlScript,
};

/// Resolves multi-locale display text.
pub trait Localizer: Send + Sync {
  fn resolve(&self, text: &LocalizedText, locale: &str) -> Option<String>;

  fn label(&self, text: &LocalizedText, locale: &str, fallback: &str) -> String {
    self
      .resolve(text, locale)
      .unwrap_or_else(|| fallback.to_owned())
  }
}

/// Exact locale, then its language (`de-AT` → `de`), then the fallback
/// locale, then whatever text exists.
#[derive(Debug, Clone)]
pub struct FallbackLocalizer {
  pub fallback_locale: String,
}

impl Default for FallbackLocalizer {
  fn default() -> Self {
    Self {
      fallback_locale: "en".into(),
    }
  }
}

impl Localizer for FallbackLocalizer {
  fn resolve(&self, text: &LocalizedText, locale: &str) -> Option<String> {
    let language = locale.split(['-', '_']).next().unwrap_or(locale);
    [locale, language, self.fallback_locale.as_str()]
      .into_iter()
      .find_map(|l| text.get(l))
      .or_else(|| text.0.values().next().map(String::as_str))
      .filter(|t| !t.trim().is_empty())
      .map(str::to_owned)
  }
}

/// Receives definition changes and DDL outcomes after they happen.
pub trait AuditSink: Send + Sync {
  fn definition_changed(
    &self,
    actor: Option<&str>,
    before: Option<&EntityDefinition>,
    after: &EntityDefinition,
  );

  fn ddl_recorded(&self, script: &DdlScript);

  /// A stored definition failed to compile. Called before the error is
  /// returned to the caller.
  fn compile_failed(&self, definition: &EntityDefinition, error: &Error);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fallback_chain() {
    let text = LocalizedText::new("en", "Product").with("de", "Produkt");
    let l = FallbackLocalizer::default();
    assert_eq!(l.resolve(&text, "de").as_deref(), Some("Produkt"));
    assert_eq!(l.resolve(&text, "de-AT").as_deref(), Some("Produkt"));
    assert_eq!(l.resolve(&text, "fr").as_deref(), Some("Product"));
    assert_eq!(
      l.resolve(&LocalizedText::new("ja", "製品"), "fr").as_deref(),
      Some("製品")
    );
    assert_eq!(l.label(&LocalizedText::default(), "en", "Code"), "Code");
  }
}
