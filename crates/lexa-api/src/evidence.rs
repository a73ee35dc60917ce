//! `POST /esg/evidence/verify`: queue an automatic check of an uploaded ESG
//! evidence file.

use axum::{Json, extract::State, http::StatusCode};
use lexa_core::{
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::FactService;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{context::RequestContext, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
  #[serde(alias = "loanId")]
  pub loan_id:     String,
  #[serde(alias = "evidenceId")]
  pub evidence_id: String,
}

/// Responds `202` with the queued job's id. The outcome lands in the audit
/// trail as `ESG_EVIDENCE_VERIFIED`, or `JOB_FAILED`.
pub async fn verify<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Json(body): Json<VerifyBody>,
) -> Result<(StatusCode, Json<Value>), ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let job_id = service.verify_evidence(
    &ctx.tenant_id,
    &body.loan_id,
    &body.evidence_id,
    &ctx.actor,
    ctx.correlation_id(),
  )?;
  info!(%job_id, evidence = %body.evidence_id, "evidence verification requested");
  Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}
