//! Error types for `lexa-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid entity keys: {0}")]
  InvalidEntity(String),

  #[error("unknown fact module: {0:?}")]
  UnknownModule(String),

  #[error("unknown audit event type: {0:?}")]
  UnknownEventType(String),

  #[error("unknown {kind}: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
