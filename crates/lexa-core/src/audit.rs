//! Append-only audit records.
//!
//! Every state transition in the engine writes exactly one [`AuditEvent`].
//! Records are never updated or deleted; retries may legitimately produce
//! duplicates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result, entity::FactModule};

/// Default page size for [`AuditQuery`].
pub const DEFAULT_AUDIT_LIMIT: usize = 50;
/// Hard upper bound on one audit page.
pub const MAX_AUDIT_LIMIT: usize = 200;

// ─── Actor ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
  User,
  Service,
}

impl ActorType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::User => "USER",
      Self::Service => "SERVICE",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "USER" => Ok(Self::User),
      "SERVICE" => Ok(Self::Service),
      other => Err(Error::UnknownVariant {
        kind:  "actor type",
        value: other.to_owned(),
      }),
    }
  }
}

/// Who caused an event: an interactive user or a background service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
  User {
    user_id: String,
    #[serde(default)]
    roles:   Vec<String>,
  },
  Service {
    client_id: String,
  },
}

impl Actor {
  /// Client id recorded for work done by the job workers.
  pub const WORKER_CLIENT_ID: &'static str = "lexa-worker";

  pub fn user(user_id: impl Into<String>, roles: Vec<String>) -> Self {
    Self::User { user_id: user_id.into(), roles }
  }

  pub fn worker() -> Self {
    Self::Service { client_id: Self::WORKER_CLIENT_ID.to_owned() }
  }

  pub fn actor_type(&self) -> ActorType {
    match self {
      Self::User { .. } => ActorType::User,
      Self::Service { .. } => ActorType::Service,
    }
  }

  /// The user id, or `None` for services.
  pub fn user_id(&self) -> Option<&str> {
    match self {
      Self::User { user_id, .. } => Some(user_id.as_str()),
      Self::Service { .. } => None,
    }
  }

  pub fn client_id(&self) -> Option<&str> {
    match self {
      Self::User { .. } => None,
      Self::Service { client_id } => Some(client_id.as_str()),
    }
  }

  pub fn roles(&self) -> &[String] {
    match self {
      Self::User { roles, .. } => roles,
      Self::Service { .. } => &[],
    }
  }

  /// Stable label used where a single string is needed (rate-limit scopes,
  /// `computed_by`).
  pub fn label(&self) -> String {
    match self {
      Self::User { user_id, .. } => format!("user:{user_id}"),
      Self::Service { client_id } => format!("service:{client_id}"),
    }
  }
}

// ─── Event types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
  JobStarted,
  JobCompleted,
  JobFailed,
  FactComputed,
  FactDriftDetected,
  ExplainCacheHit,
  ExplainGenerated,
  ExplainFailed,
  AiRateLimitDenied,
  OpsJobStarted,
  OpsJobCompleted,
  OpsJobFailed,
  EsgEvidenceVerified,
}

impl AuditEventType {
  pub const ALL: [AuditEventType; 13] = [
    Self::JobStarted,
    Self::JobCompleted,
    Self::JobFailed,
    Self::FactComputed,
    Self::FactDriftDetected,
    Self::ExplainCacheHit,
    Self::ExplainGenerated,
    Self::ExplainFailed,
    Self::AiRateLimitDenied,
    Self::OpsJobStarted,
    Self::OpsJobCompleted,
    Self::OpsJobFailed,
    Self::EsgEvidenceVerified,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::JobStarted => "JOB_STARTED",
      Self::JobCompleted => "JOB_COMPLETED",
      Self::JobFailed => "JOB_FAILED",
      Self::FactComputed => "FACT_COMPUTED",
      Self::FactDriftDetected => "FACT_DRIFT_DETECTED",
      Self::ExplainCacheHit => "EXPLAIN_CACHE_HIT",
      Self::ExplainGenerated => "EXPLAIN_GENERATED",
      Self::ExplainFailed => "EXPLAIN_FAILED",
      Self::AiRateLimitDenied => "AI_RATE_LIMIT_DENIED",
      Self::OpsJobStarted => "OPS_JOB_STARTED",
      Self::OpsJobCompleted => "OPS_JOB_COMPLETED",
      Self::OpsJobFailed => "OPS_JOB_FAILED",
      Self::EsgEvidenceVerified => "ESG_EVIDENCE_VERIFIED",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| Error::UnknownEventType(s.to_owned()))
  }
}

impl fmt::Display for AuditEventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
  pub event_id:        Uuid,
  /// Store-assigned, strictly increasing; used as the pagination cursor.
  pub seq:             i64,
  pub tenant_id:       String,
  pub actor_id:        Option<String>,
  pub actor_type:      ActorType,
  pub actor_client_id: Option<String>,
  #[serde(rename = "type")]
  pub event_type:      AuditEventType,
  pub module:          Option<FactModule>,
  pub summary:         String,
  pub evidence_ref:    Option<String>,
  pub payload:         Value,
  pub correlation_id:  Option<String>,
  pub created_at:      DateTime<Utc>,
}

/// Input to [`crate::store::LedgerStore::append_audit`]. `event_id`, `seq`
/// and `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
  pub tenant_id:       String,
  pub actor_id:        Option<String>,
  pub actor_type:      ActorType,
  pub actor_client_id: Option<String>,
  pub event_type:      AuditEventType,
  pub module:          Option<FactModule>,
  pub summary:         String,
  pub evidence_ref:    Option<String>,
  pub payload:         Value,
  pub correlation_id:  Option<String>,
}

impl NewAuditEvent {
  pub fn new(
    tenant_id: impl Into<String>,
    actor: &Actor,
    event_type: AuditEventType,
    summary: impl Into<String>,
  ) -> Self {
    Self {
      tenant_id: tenant_id.into(),
      actor_id: actor.user_id().map(str::to_owned),
      actor_type: actor.actor_type(),
      actor_client_id: actor.client_id().map(str::to_owned),
      event_type,
      module: None,
      summary: summary.into(),
      evidence_ref: None,
      payload: Value::Object(Default::default()),
      correlation_id: None,
    }
  }

  pub fn module(mut self, module: FactModule) -> Self {
    self.module = Some(module);
    self
  }

  pub fn evidence_ref(mut self, evidence_ref: impl Into<String>) -> Self {
    self.evidence_ref = Some(evidence_ref.into());
    self
  }

  pub fn payload(mut self, payload: Value) -> Self {
    self.payload = payload;
    self
  }

  pub fn correlation_id(mut self, id: Option<String>) -> Self {
    self.correlation_id = id;
    self
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// Filters for [`crate::store::LedgerStore::query_audit`]. Results are
/// newest first; `cursor` is the `seq` of the last item of the previous page.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
  pub tenant_id:      String,
  pub actor_type:     Option<ActorType>,
  pub correlation_id: Option<String>,
  pub module:         Option<FactModule>,
  /// Matches `evidence_ref` exactly.
  pub entity_ref:     Option<String>,
  pub event_type:     Option<AuditEventType>,
  pub from:           Option<DateTime<Utc>>,
  pub to:             Option<DateTime<Utc>>,
  pub limit:          Option<usize>,
  pub cursor:         Option<i64>,
}

impl AuditQuery {
  pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
    Self { tenant_id: tenant_id.into(), ..Default::default() }
  }

  /// The page size after defaulting and clamping.
  pub fn effective_limit(&self) -> usize {
    self
      .limit
      .unwrap_or(DEFAULT_AUDIT_LIMIT)
      .clamp(1, MAX_AUDIT_LIMIT)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
  pub items:       Vec<AuditEvent>,
  pub next_cursor: Option<i64>,
}
