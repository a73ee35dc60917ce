//! Encoding and decoding helpers between Lexa domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond precision
//! and a `Z` suffix, so lexical order equals chronological order. Structured
//! fields are stored as compact JSON. UUIDs are hyphenated lowercase.

use chrono::{DateTime, SecondsFormat, Utc};
use lexa_core::{
  audit::{ActorType, AuditEvent, AuditEventType},
  entity::{EntityKeys, FactModule},
  explain::{Audience, CachedExplanation, Verbosity},
  fact::FactSnapshot,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawSnapshot`]'s field order.
pub const SNAPSHOT_COLUMNS: &str = "snapshot_id, tenant_id, entity_json, \
                                    data_json, fact_version, fact_hash, \
                                    computed_at, computed_by, correlation_id";

/// Raw strings read directly from a snapshot row.
pub struct RawSnapshot {
  pub snapshot_id:    String,
  pub tenant_id:      String,
  pub entity_json:    String,
  pub data_json:      String,
  pub fact_version:   i64,
  pub fact_hash:      String,
  pub computed_at:    String,
  pub computed_by:    String,
  pub correlation_id: Option<String>,
}

impl RawSnapshot {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      snapshot_id:    row.get(0)?,
      tenant_id:      row.get(1)?,
      entity_json:    row.get(2)?,
      data_json:      row.get(3)?,
      fact_version:   row.get(4)?,
      fact_hash:      row.get(5)?,
      computed_at:    row.get(6)?,
      computed_by:    row.get(7)?,
      correlation_id: row.get(8)?,
    })
  }

  pub fn into_snapshot(self) -> Result<FactSnapshot> {
    let entity: EntityKeys = serde_json::from_str(&self.entity_json)?;
    let fact_version = u32::try_from(self.fact_version).map_err(|_| {
      Error::Corrupt(format!("fact_version out of range: {}", self.fact_version))
    })?;
    Ok(FactSnapshot {
      snapshot_id: decode_uuid(&self.snapshot_id)?,
      tenant_id: self.tenant_id,
      entity,
      data: serde_json::from_str(&self.data_json)?,
      computed_at: decode_dt(&self.computed_at)?,
      computed_by: self.computed_by,
      fact_version,
      fact_hash: self.fact_hash,
      correlation_id: self.correlation_id,
    })
  }
}

pub const EXPLANATION_COLUMNS: &str = "fact_hash, audience, verbosity, \
                                       tenant_id, module, entity_key, \
                                       result_json, provider, generated_at, \
                                       correlation_id";

/// Raw strings read directly from an `explanation_cache` row.
pub struct RawExplanation {
  pub fact_hash:      String,
  pub audience:       String,
  pub verbosity:      String,
  pub tenant_id:      String,
  pub module:         String,
  pub entity_key:     String,
  pub result_json:    String,
  pub provider:       String,
  pub generated_at:   String,
  pub correlation_id: Option<String>,
}

impl RawExplanation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fact_hash:      row.get(0)?,
      audience:       row.get(1)?,
      verbosity:      row.get(2)?,
      tenant_id:      row.get(3)?,
      module:         row.get(4)?,
      entity_key:     row.get(5)?,
      result_json:    row.get(6)?,
      provider:       row.get(7)?,
      generated_at:   row.get(8)?,
      correlation_id: row.get(9)?,
    })
  }

  pub fn into_explanation(self) -> Result<CachedExplanation> {
    Ok(CachedExplanation {
      fact_hash:      self.fact_hash,
      audience:       Audience::parse(&self.audience)?,
      verbosity:      Verbosity::parse(&self.verbosity)?,
      tenant_id:      self.tenant_id,
      module:         FactModule::parse(&self.module)?,
      entity_key:     self.entity_key,
      result:         serde_json::from_str(&self.result_json)?,
      provider:       self.provider,
      generated_at:   decode_dt(&self.generated_at)?,
      correlation_id: self.correlation_id,
    })
  }
}

pub const AUDIT_COLUMNS: &str = "seq, event_id, tenant_id, actor_id, \
                                 actor_type, actor_client_id, event_type, \
                                 module, summary, evidence_ref, payload_json, \
                                 correlation_id, created_at";

/// Raw strings read directly from an `audit_events` row.
pub struct RawAuditEvent {
  pub seq:             i64,
  pub event_id:        String,
  pub tenant_id:       String,
  pub actor_id:        Option<String>,
  pub actor_type:      String,
  pub actor_client_id: Option<String>,
  pub event_type:      String,
  pub module:          Option<String>,
  pub summary:         String,
  pub evidence_ref:    Option<String>,
  pub payload_json:    String,
  pub correlation_id:  Option<String>,
  pub created_at:      String,
}

impl RawAuditEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:             row.get(0)?,
      event_id:        row.get(1)?,
      tenant_id:       row.get(2)?,
      actor_id:        row.get(3)?,
      actor_type:      row.get(4)?,
      actor_client_id: row.get(5)?,
      event_type:      row.get(6)?,
      module:          row.get(7)?,
      summary:         row.get(8)?,
      evidence_ref:    row.get(9)?,
      payload_json:    row.get(10)?,
      correlation_id:  row.get(11)?,
      created_at:      row.get(12)?,
    })
  }

  pub fn into_event(self) -> Result<AuditEvent> {
    Ok(AuditEvent {
      event_id:        decode_uuid(&self.event_id)?,
      seq:             self.seq,
      tenant_id:       self.tenant_id,
      actor_id:        self.actor_id,
      actor_type:      ActorType::parse(&self.actor_type)?,
      actor_client_id: self.actor_client_id,
      event_type:      AuditEventType::parse(&self.event_type)?,
      module:          self.module.as_deref().map(FactModule::parse).transpose()?,
      summary:         self.summary,
      evidence_ref:    self.evidence_ref,
      payload:         serde_json::from_str(&self.payload_json)?,
      correlation_id:  self.correlation_id,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_lexically() {
    let a = Utc.timestamp_opt(1_700_000_000, 999_000).unwrap();
    let b = Utc.timestamp_opt(1_700_000_000, 1_000_000).unwrap();
    let c = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert!(ea < eb && eb < ec, "{ea} {eb} {ec}");
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }
}
