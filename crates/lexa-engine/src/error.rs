//! Error type for `lexa-engine`.

use std::time::Duration;

use lexa_core::producer::{BlobError, GeneratorError, ProducerError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Malformed job or request; never retried.
  #[error("validation failed: {0}")]
  Validation(String),

  /// The upstream entity or fact does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// A recompute ran but still produced no fact for the entity.
  #[error("no fact available for {0}")]
  NoFacts(String),

  /// The recompute triggered for an explain did not finish in time.
  #[error("facts for {0} are not ready yet")]
  FactsNotReady(String),

  #[error("rate limited; retry after {}s", .retry_after.as_secs())]
  RateLimited { retry_after: Duration },

  /// Terminal generator failure.
  #[error("explanation generator failed: {0}")]
  Generator(String),

  #[error("transient failure: {0}")]
  Transient(String),

  #[error("timed out after {}ms", .0.as_millis())]
  Timeout(Duration),

  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] lexa_core::Error),

  #[error("job queue is closed")]
  QueueClosed,
}

impl EngineError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  /// Whether the job queue should re-deliver a job that failed with this
  /// error.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::Transient(_)
        | Self::Timeout(_)
        | Self::RateLimited { .. }
        | Self::FactsNotReady(_)
        | Self::Store(_)
    )
  }

  /// The earliest a retry can succeed, when the error says so.
  pub fn retry_after(&self) -> Option<Duration> {
    match self {
      Self::RateLimited { retry_after } => Some(*retry_after),
      _ => None,
    }
  }

  /// Short stable label recorded in audit payloads.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Validation(_) | Self::Core(_) => "validation",
      Self::NotFound(_) => "not_found",
      Self::NoFacts(_) => "no_facts",
      Self::FactsNotReady(_) => "facts_not_ready",
      Self::RateLimited { .. } => "rate_limited",
      Self::Generator(_) => "generator",
      Self::Transient(_) => "transient",
      Self::Timeout(_) => "timeout",
      Self::Store(_) => "store",
      Self::QueueClosed => "queue_closed",
    }
  }
}

impl From<ProducerError> for EngineError {
  fn from(e: ProducerError) -> Self {
    match e {
      ProducerError::NotFound(m) => Self::NotFound(m),
      ProducerError::Invalid(m) => Self::Validation(m),
      ProducerError::Transient(m) => Self::Transient(m),
    }
  }
}

impl From<GeneratorError> for EngineError {
  fn from(e: GeneratorError) -> Self {
    match e {
      GeneratorError::RateLimited { retry_after } => Self::RateLimited { retry_after },
      GeneratorError::Transient(m) => Self::Transient(m),
      GeneratorError::Terminal(m) => Self::Generator(m),
    }
  }
}

impl From<BlobError> for EngineError {
  fn from(e: BlobError) -> Self {
    match e {
      BlobError::NotFound(m) => Self::NotFound(m),
      BlobError::Transient(m) => Self::Transient(m),
    }
  }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
