//! `POST /ops/refresh`: queue a manual refresh of the caller's tenant.

use axum::{Json, extract::State, http::StatusCode};
use lexa_core::{
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::{FactService, job::RefreshReason};
use serde_json::{Value, json};
use tracing::info;

use crate::{context::RequestContext, error::ApiError};

pub async fn refresh<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
) -> Result<(StatusCode, Json<Value>), ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let job_id = service.request_refresh(
    &ctx.tenant_id,
    RefreshReason::Manual,
    &ctx.actor,
    ctx.correlation_id(),
  )?;
  info!(%job_id, tenant = %ctx.tenant_id, actor = %ctx.actor.label(), "manual refresh requested");
  Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}
