//! Collaborators the engine consumes: fact producers, the entity catalog used
//! by nightly refresh, the evidence catalog, explanation generators and blob
//! storage.
//!
//! Domain scoring rules live behind [`FactProducer`]; the engine never knows
//! how a readiness score or covenant result is computed.

use std::{future::Future, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{
  entity::EntityKeys,
  evidence::EvidenceRecord,
  explain::{ExplanationInput, ExplanationResult},
  fact::FactPayload,
};

// ─── Fact producers ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProducerError {
  /// The entity does not exist upstream.
  #[error("not found: {0}")]
  NotFound(String),

  /// The upstream returned something that is not a usable fact.
  #[error("invalid upstream data: {0}")]
  Invalid(String),

  /// Temporary failure; safe to retry.
  #[error("transient upstream failure: {0}")]
  Transient(String),
}

impl ProducerError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transient(_))
  }
}

/// Computes the current fact for an entity from upstream domain data.
pub trait FactProducer: Send + Sync {
  fn compute<'a>(
    &'a self,
    tenant_id: &'a str,
    entity: &'a EntityKeys,
  ) -> impl Future<Output = Result<FactPayload, ProducerError>> + Send + 'a;
}

/// Enumerates the entities a nightly refresh should touch.
pub trait EntityCatalog: Send + Sync {
  /// The most recently touched loans, newest first.
  fn recent_loans<'a>(
    &'a self,
    tenant_id: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<String>, ProducerError>> + Send + 'a;

  fn kpis_for_loan<'a>(
    &'a self,
    tenant_id: &'a str,
    loan_id: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<String>, ProducerError>> + Send + 'a;

  fn covenants_for_loan<'a>(
    &'a self,
    tenant_id: &'a str,
    loan_id: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<String>, ProducerError>> + Send + 'a;
}

/// Looks up ESG evidence documents attached to a loan.
pub trait EvidenceCatalog: Send + Sync {
  fn evidence<'a>(
    &'a self,
    tenant_id: &'a str,
    loan_id: &'a str,
    evidence_id: &'a str,
  ) -> impl Future<Output = Result<EvidenceRecord, ProducerError>> + Send + 'a;
}

/// Everything the engine needs from the domain side.
pub trait Upstream: FactProducer + EntityCatalog + EvidenceCatalog + BlobStore {}

impl<T: FactProducer + EntityCatalog + EvidenceCatalog + BlobStore> Upstream for T {}

// ─── Explanation generators ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GeneratorError {
  #[error("generator rate limited; retry after {}s", .retry_after.as_secs())]
  RateLimited { retry_after: Duration },

  #[error("transient generator failure: {0}")]
  Transient(String),

  #[error("generator failure: {0}")]
  Terminal(String),
}

impl GeneratorError {
  pub fn is_retryable(&self) -> bool {
    !matches!(self, Self::Terminal(_))
  }
}

/// Turns a fact into a natural-language explanation.
pub trait ExplanationGenerator: Send + Sync {
  /// Recorded as the cache row's provider.
  fn name(&self) -> &str;

  fn generate<'a>(
    &'a self,
    input: &'a ExplanationInput,
  ) -> impl Future<Output = Result<ExplanationResult, GeneratorError>> + Send + 'a;
}

// ─── Blob storage ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BlobError {
  #[error("object not found: {0}")]
  NotFound(String),

  #[error("transient storage failure: {0}")]
  Transient(String),
}

impl BlobError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transient(_))
  }
}

pub trait BlobStore: Send + Sync {
  fn get_object<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Bytes, BlobError>> + Send + 'a;
}
