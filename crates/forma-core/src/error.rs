//! Error types for `forma-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum Error {
  #[error("field {field}: unknown data type {code:?}")]
  UnknownDataType { field: String, code: String },

  #[error("field {field}: referenced entity {entity_id} cannot be resolved")]
  UnresolvedReference { field: String, entity_id: Uuid },

  #[error("field {field}: invalid validation rules: {message}")]
  InvalidRules { field: String, message: String },

  #[error("field {field}: invalid default value: {message}")]
  InvalidDefault { field: String, message: String },

  #[error("cannot convert value for {field}: {message}")]
  TypeCoercion { field: String, message: String },

  #[error("unknown field {field:?}")]
  UnknownField { field: String },

  #[error("serialization error: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}

impl Error {
  pub(crate) fn coercion(field: &str, message: impl Into<String>) -> Self {
    Self::TypeCoercion {
      field:   field.to_owned(),
      message: message.into(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
