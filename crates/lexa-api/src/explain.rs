//! Handlers for `/explain` endpoints.
//!
//! The audience defaults to one derived from the caller's roles; verbosity
//! defaults to `STANDARD`.

use axum::{
  Json,
  extract::{Query, State},
};
use lexa_core::{
  explain::{Audience, ExplanationResult, LatestExplanation, Verbosity},
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::FactService;
use serde::{Deserialize, Serialize};

use crate::{context::RequestContext, error::ApiError, facts::EntityParams};

#[derive(Debug, Deserialize)]
pub struct ExplainBody {
  #[serde(flatten)]
  pub entity:    EntityParams,
  pub audience:  Option<Audience>,
  pub verbosity: Option<Verbosity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
  #[serde(flatten)]
  pub result:    ExplanationResult,
  pub fact_hash: String,
  pub cached:    bool,
}

/// `POST /explain`: `429` with `Retry-After` when rate limited, `400` when
/// the entity has no facts, `503` while they are still being computed.
pub async fn explain<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Json(body): Json<ExplainBody>,
) -> Result<Json<ExplainResponse>, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let entity = body.entity.keys()?;
  let audience = body.audience.unwrap_or_else(|| Audience::from_roles(ctx.actor.roles()));
  let verbosity = body.verbosity.unwrap_or_default();

  let outcome = service
    .explain(&ctx.tenant_id, &entity, audience, verbosity, &ctx.actor, ctx.correlation_id())
    .await?;
  Ok(Json(ExplainResponse {
    result:    outcome.result,
    fact_hash: outcome.fact_hash,
    cached:    outcome.cached,
  }))
}

#[derive(Debug, Deserialize)]
pub struct PresentationParams {
  pub audience:  Option<Audience>,
  pub verbosity: Option<Verbosity>,
}

/// `GET /explain/latest?module=...&loan_id=...[&audience=...][&verbosity=...]`
pub async fn latest<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Query(params): Query<EntityParams>,
  Query(presentation): Query<PresentationParams>,
) -> Result<Json<LatestExplanation>, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let entity = params.keys()?;
  let audience =
    presentation.audience.unwrap_or_else(|| Audience::from_roles(ctx.actor.roles()));
  let latest = service
    .latest_explanation(
      &ctx.tenant_id,
      &entity,
      audience,
      presentation.verbosity.unwrap_or_default(),
    )
    .await?;
  Ok(Json(latest))
}
