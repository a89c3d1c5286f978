//! Engine error type.

use std::sync::Arc;

use forma_core::{schema::ChangeAnalysis, validate::ValidationError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum Error {
  #[error("definition is invalid: {}", summarize(.0))]
  Validation(Vec<ValidationError>),

  #[error("definition {definition_id} does not compile: {source}")]
  Compile {
    definition_id: Uuid,
    #[source]
    source:        forma_core::Error,
  },

  #[error("schema change is destructive: {}", summarize(&.0.destructive))]
  DestructiveChange(Box<ChangeAnalysis>),

  #[error("DDL script {script_id} failed: {message}")]
  DdlExecution { script_id: Uuid, message: String },

  #[error("definition {0} not found")]
  DefinitionNotFound(Uuid),

  #[error("no published type named {0:?}")]
  TypeNotFound(String),

  #[error("{type_name} row {id} not found")]
  RowNotFound { type_name: String, id: i64 },

  #[error("table {0:?} not found")]
  TableNotFound(String),

  #[error("{type_name} row {id} was modified concurrently")]
  ConcurrencyConflict { type_name: String, id: i64 },

  #[error("cannot convert value for {field}: {message}")]
  TypeCoercion { field: String, message: String },

  #[error("unknown field {field:?}")]
  UnknownField { field: String },

  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("nothing to publish")]
  NothingToPublish,

  #[error("operation cancelled")]
  Cancelled,

  #[error("core error: {0}")]
  Core(#[source] forma_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

fn summarize<T: std::fmt::Display>(items: &[T]) -> String {
  items
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

impl From<forma_core::Error> for Error {
  fn from(e: forma_core::Error) -> Self {
    match e {
      forma_core::Error::TypeCoercion { field, message } => Self::TypeCoercion { field, message },
      forma_core::Error::UnknownField { field } => Self::UnknownField { field },
      other => Self::Core(other),
    }
  }
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Arc::new(e))
  }

  pub(crate) fn invalid(path: &str, message: impl Into<String>) -> Self {
    Self::Validation(vec![ValidationError {
      property_path: path.to_owned(),
      message:       message.into(),
    }])
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
