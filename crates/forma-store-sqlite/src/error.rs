//! Error type for `forma-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored value could not be read back as its declared type.
  #[error("decode error: {0}")]
  Decode(String),

  #[error("ddl script not found: {0}")]
  ScriptNotFound(uuid::Uuid),

  #[error("ddl script {0} is not pending")]
  ScriptNotPending(uuid::Uuid),

  #[error("operation cancelled")]
  Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
