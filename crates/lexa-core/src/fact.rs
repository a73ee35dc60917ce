//! Fact payloads and the immutable, hash-keyed snapshots they are stored as.
//!
//! A snapshot is never updated. When a recompute produces a different hash a
//! new snapshot is written and the old one stays in place; "latest" is
//! always derived from `computed_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Result,
  entity::{EntityKeys, FactModule},
  hash,
};

// ─── FactPayload ─────────────────────────────────────────────────────────────

/// Domain data computed by a fact producer, tagged with the version of the
/// rules that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactPayload {
  pub fact_version: u32,
  pub data:         Value,
}

impl FactPayload {
  pub fn new(fact_version: u32, data: Value) -> Self {
    Self { fact_version, data }
  }
}

// ─── FactSnapshot ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactSnapshot {
  pub snapshot_id:    Uuid,
  pub tenant_id:      String,
  pub entity:         EntityKeys,
  pub data:           Value,
  /// Set by the store on insert; never changes.
  pub computed_at:    DateTime<Utc>,
  /// Actor or job that computed the fact (e.g. `job:trading.recompute`).
  pub computed_by:    String,
  pub fact_version:   u32,
  pub fact_hash:      String,
  pub correlation_id: Option<String>,
}

impl FactSnapshot {
  pub fn module(&self) -> FactModule {
    self.entity.module()
  }

  pub fn payload(&self) -> FactPayload {
    FactPayload::new(self.fact_version, self.data.clone())
  }
}

// ─── NewSnapshot ─────────────────────────────────────────────────────────────

/// Input to [`crate::store::LedgerStore::upsert_by_hash`].
///
/// The hash is computed on construction so callers cannot pair a payload with
/// a digest of something else. `computed_at` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
  pub tenant_id:      String,
  pub entity:         EntityKeys,
  pub payload:        FactPayload,
  pub fact_hash:      String,
  pub computed_by:    String,
  pub correlation_id: Option<String>,
}

impl NewSnapshot {
  pub fn new(
    tenant_id: impl Into<String>,
    entity: EntityKeys,
    payload: FactPayload,
    computed_by: impl Into<String>,
  ) -> Result<Self> {
    let fact_hash = hash::fact_hash(&entity, &payload)?;
    Ok(Self {
      tenant_id: tenant_id.into(),
      entity,
      payload,
      fact_hash,
      computed_by: computed_by.into(),
      correlation_id: None,
    })
  }

  pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
    self.correlation_id = id;
    self
  }

  pub fn module(&self) -> FactModule {
    self.entity.module()
  }
}

/// Result of a hash-keyed upsert.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
  /// The stored row; on a no-op this is the pre-existing snapshot.
  pub snapshot: FactSnapshot,
  /// `false` when a snapshot with the same `(tenant, fact_hash)` already
  /// existed.
  pub created:  bool,
}
