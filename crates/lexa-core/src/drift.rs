//! Drift detection between consecutive snapshots of one entity.
//!
//! The detector has no state of its own. A snapshot is compared with the
//! snapshot computed just before it, and the resulting event is recorded at
//! most once per next hash, so replaying the same fact never raises drift
//! twice.

use serde_json::json;

use crate::{
  audit::{Actor, AuditEventType, NewAuditEvent},
  entity::{EntityKeys, FactModule},
  fact::FactSnapshot,
};

/// `true` iff there was a previous hash and it differs from `next`.
/// A first write is a baseline, never drift.
pub fn detect_drift(prev: Option<&str>, next: &str) -> bool {
  prev.is_some_and(|p| p != next)
}

/// A detected change in an entity's fact hash.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftEvent {
  pub tenant_id:        String,
  pub module:           FactModule,
  pub entity:           EntityKeys,
  pub prev_fact_hash:   String,
  pub next_fact_hash:   String,
  pub prev_computed_at: chrono::DateTime<chrono::Utc>,
  pub next_computed_at: chrono::DateTime<chrono::Utc>,
  pub reason:           String,
}

impl DriftEvent {
  /// Compare `prev` and `next` and build the event if they drifted.
  pub fn between(
    prev: Option<&FactSnapshot>,
    next: &FactSnapshot,
    reason: impl Into<String>,
  ) -> Option<Self> {
    let prev = prev?;
    if !detect_drift(Some(&prev.fact_hash), &next.fact_hash) {
      return None;
    }
    Some(Self {
      tenant_id:        next.tenant_id.clone(),
      module:           next.module(),
      entity:           next.entity.clone(),
      prev_fact_hash:   prev.fact_hash.clone(),
      next_fact_hash:   next.fact_hash.clone(),
      prev_computed_at: prev.computed_at,
      next_computed_at: next.computed_at,
      reason:           reason.into(),
    })
  }

  /// The `FACT_DRIFT_DETECTED` record for this drift.
  pub fn to_audit(
    &self,
    actor: &Actor,
    correlation_id: Option<String>,
  ) -> NewAuditEvent {
    NewAuditEvent::new(
      &self.tenant_id,
      actor,
      AuditEventType::FactDriftDetected,
      format!(
        "{} fact changed for {}",
        self.module.label(),
        self.entity.entity_key()
      ),
    )
    .module(self.module)
    .evidence_ref(self.entity.evidence_ref())
    .payload(json!({
      "module": self.module,
      "entity": self.entity,
      "prevFactHash": self.prev_fact_hash,
      "nextFactHash": self.next_fact_hash,
      "prevComputedAt": self.prev_computed_at,
      "nextComputedAt": self.next_computed_at,
      "reason": self.reason,
    }))
    .correlation_id(correlation_id)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, Utc};
  use serde_json::json;
  use uuid::Uuid;

  use super::*;

  fn snap(hash: &str) -> FactSnapshot {
    FactSnapshot {
      snapshot_id:    Uuid::new_v4(),
      tenant_id:      "t1".into(),
      entity:         EntityKeys::trading("loan-1"),
      data:           json!({}),
      computed_at:    Utc::now(),
      computed_by:    "test".into(),
      fact_version:   1,
      fact_hash:      hash.into(),
      correlation_id: None,
    }
  }

  #[test]
  fn first_write_is_not_drift() {
    assert!(!detect_drift(None, "h1"));
    assert!(DriftEvent::between(None, &snap("h1"), "recompute").is_none());
  }

  #[test]
  fn same_hash_is_not_drift() {
    assert!(!detect_drift(Some("h1"), "h1"));
    assert!(DriftEvent::between(Some(&snap("h1")), &snap("h1"), "x").is_none());
  }

  #[test]
  fn different_hash_builds_event() {
    let prev = snap("h1");
    let mut next = snap("h2");
    next.computed_at = prev.computed_at + Duration::seconds(5);
    let ev = DriftEvent::between(Some(&prev), &next, "recompute").unwrap();
    assert_eq!(ev.prev_fact_hash, "h1");
    assert_eq!(ev.next_fact_hash, "h2");

    let audit = ev.to_audit(&Actor::worker(), Some("c-1".into()));
    assert_eq!(audit.event_type, AuditEventType::FactDriftDetected);
    assert_eq!(audit.evidence_ref.as_deref(), Some("loan-1"));
    assert_eq!(audit.payload["prevFactHash"], "h1");
    assert_eq!(audit.payload["nextFactHash"], "h2");
    assert_eq!(audit.correlation_id.as_deref(), Some("c-1"));
  }
}
