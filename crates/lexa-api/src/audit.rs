//! `GET /audit`: the tenant's audit trail, newest first.
//!
//! Filters: `actor_type`, `correlation_id`, `module`, `entity_ref`,
//! `event_type`, `from`, `to`. Paging: `limit` (default 50, max 200) and
//! `cursor` taken from the previous page's `nextCursor`.

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use lexa_core::{
  audit::{ActorType, AuditEventType, AuditPage, AuditQuery},
  entity::FactModule,
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::FactService;
use serde::Deserialize;

use crate::{context::RequestContext, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub actor_type:     Option<ActorType>,
  pub correlation_id: Option<String>,
  pub module:         Option<FactModule>,
  pub entity_ref:     Option<String>,
  pub event_type:     Option<AuditEventType>,
  pub from:           Option<DateTime<Utc>>,
  pub to:             Option<DateTime<Utc>>,
  pub limit:          Option<usize>,
  pub cursor:         Option<i64>,
}

pub async fn list<S, U, G>(
  State(service): State<FactService<S, U, G>>,
  ctx: RequestContext,
  Query(params): Query<AuditParams>,
) -> Result<Json<AuditPage>, ApiError>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  if let (Some(from), Some(to)) = (params.from, params.to) {
    if from > to {
      return Err(ApiError::BadRequest("`from` is after `to`".into()));
    }
  }

  let query = AuditQuery {
    tenant_id:      ctx.tenant_id,
    actor_type:     params.actor_type,
    correlation_id: params.correlation_id,
    module:         params.module,
    entity_ref:     params.entity_ref,
    event_type:     params.event_type,
    from:           params.from,
    to:             params.to,
    limit:          params.limit,
    cursor:         params.cursor,
  };
  Ok(Json(service.query_audit(&query).await?))
}
