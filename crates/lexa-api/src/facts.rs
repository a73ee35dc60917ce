//! Handlers for `/facts` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/facts/latest` | Entity params; 404 when nothing was computed yet |
//! | `GET`  | `/facts` | Entity params plus optional `limit`, `before`; newest first |
//! | `POST` | `/facts/recompute` | Body: [`EntityParams`]; 200 when done, 202 + `jobId` otherwise |

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use lexa_core::{
  entity::{EntityKeys, FactModule},
  fact::FactSnapshot,
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::{FactService, service::RecomputeStatus};
use serde::Deserialize;
use serde_json::json;

use crate::{context::RequestContext, error::ApiError};

/// Flat entity addressing shared by query strings and JSON bodies, e.g.
/// `?module=esg_kpi&loan_id=loan-1&kpi_id=kpi-2`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityParams {
  pub module:       FactModule,
  pub loan_id:      Option<String>,
  pub kpi_id:       Option<String>,
  pub covenant_id:  Option<String>,
  pub portfolio_id: Option<String>,
}

impl EntityParams {
  pub fn keys(self) -> Result<EntityKeys, ApiError> {
    Ok(EntityKeys::from_parts(
      self.module,
      self.loan_id,
      self.kpi_id,
      self.covenant_id,
      self.portfolio_id,
    )?)
  }
}

// ─── Latest ──────────────────────────────────────────────────────────────────

/// `GET /facts/latest?module=...&loan_id=...`
pub async fn latest<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Query(params): Query<EntityParams>,
) -> Result<Json<FactSnapshot>, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let entity = params.keys()?;
  let snapshot = service
    .latest_snapshot(&ctx.tenant_id, &entity)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("no snapshot for {entity}")))?;
  Ok(Json(snapshot))
}

// ─── History ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  /// Default 20, at most 100.
  pub limit:  Option<usize>,
  /// Only snapshots computed strictly before this instant.
  pub before: Option<DateTime<Utc>>,
}

/// `GET /facts?module=...&loan_id=...[&limit=...][&before=...]`
pub async fn history<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Query(params): Query<EntityParams>,
  Query(page): Query<HistoryParams>,
) -> Result<Json<Vec<FactSnapshot>>, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let entity = params.keys()?;
  let snapshots = service
    .list_snapshots(&ctx.tenant_id, &entity, page.limit.unwrap_or(20), page.before)
    .await?;
  Ok(Json(snapshots))
}

// ─── Recompute ───────────────────────────────────────────────────────────────

/// `POST /facts/recompute`
pub async fn recompute<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Json(params): Json<EntityParams>,
) -> Result<Response, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let entity = params.keys()?;
  let status = service
    .recompute_facts(&ctx.tenant_id, &entity, &ctx.actor, ctx.correlation_id())
    .await?;

  Ok(match status {
    RecomputeStatus::Completed(outcome) => Json(outcome).into_response(),
    RecomputeStatus::Pending { job_id } => {
      (StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))).into_response()
    }
  })
}
