//! API error type and [`axum::response::IntoResponse`] implementation.

use std::time::Duration;

use axum::{
  Json,
  http::{StatusCode, header},
  response::{IntoResponse, Response},
};
use lexa_engine::EngineError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// How long a client should wait before retrying an explain whose facts are
/// still being computed.
pub const FACTS_NOT_READY_RETRY_AFTER: Duration = Duration::from_secs(5);

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("no facts: {0}")]
  NoFacts(String),

  #[error("facts not ready: {0}")]
  FactsNotReady(String),

  #[error("rate limited")]
  RateLimited { retry_after: Duration },

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Stable error code sent to clients.
  pub fn code(&self) -> &'static str {
    match self {
      ApiError::NotFound(_) => "not_found",
      ApiError::BadRequest(_) => "bad_request",
      ApiError::NoFacts(_) => "no_facts",
      ApiError::FactsNotReady(_) => "facts_not_ready",
      ApiError::RateLimited { .. } => "rate_limited",
      ApiError::Internal(_) => "internal",
    }
  }
}

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    match e {
      EngineError::Validation(m) => ApiError::BadRequest(m),
      EngineError::Core(e) => ApiError::BadRequest(e.to_string()),
      EngineError::NotFound(m) => ApiError::NotFound(m),
      EngineError::NoFacts(m) => ApiError::NoFacts(m),
      EngineError::FactsNotReady(m) => ApiError::FactsNotReady(m),
      EngineError::RateLimited { retry_after } => ApiError::RateLimited { retry_after },
      other => ApiError::Internal(Box::new(other)),
    }
  }
}

impl From<lexa_core::Error> for ApiError {
  fn from(e: lexa_core::Error) -> Self { ApiError::BadRequest(e.to_string()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let code = self.code();
    let (status, message, retry_after) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone(), None),
      ApiError::BadRequest(m) | ApiError::NoFacts(m) => {
        (StatusCode::BAD_REQUEST, m.clone(), None)
      }
      ApiError::FactsNotReady(m) => (
        StatusCode::SERVICE_UNAVAILABLE,
        m.clone(),
        Some(FACTS_NOT_READY_RETRY_AFTER),
      ),
      ApiError::RateLimited { retry_after } => (
        StatusCode::TOO_MANY_REQUESTS,
        "explanation rate limit exceeded".to_owned(),
        Some(*retry_after),
      ),
      ApiError::Internal(e) => {
        error!(error = %e, "internal API error");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned(), None)
      }
    };

    let body = Json(json!({ "error": code, "message": message }));
    match retry_after {
      // Retry-After has whole-second resolution; never advertise zero.
      Some(after) => {
        let secs = after.as_secs().max(1).to_string();
        (status, [(header::RETRY_AFTER, secs)], body).into_response()
      }
      None => (status, body).into_response(),
    }
  }
}
