//! [`SqliteStore`]: the SQLite implementation of [`LedgerStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use tracing::debug;
use uuid::Uuid;

use lexa_core::{
  audit::{AuditEvent, AuditPage, AuditQuery, NewAuditEvent},
  entity::{EntityKeys, FactModule},
  explain::{Audience, CachedExplanation, ExplanationKey, NewExplanation, Verbosity},
  fact::{FactSnapshot, NewSnapshot, UpsertOutcome},
  store::LedgerStore,
};

use crate::{
  Result,
  encode::{
    AUDIT_COLUMNS, EXPLANATION_COLUMNS, RawAuditEvent, RawExplanation,
    RawSnapshot, SNAPSHOT_COLUMNS, encode_dt, encode_uuid,
  },
  schema::{schema, snapshot_table},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Lexa ledger backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and all
/// statements run serially on its dedicated thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let ddl = schema();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── LedgerStore impl ────────────────────────────────────────────────────────

impl LedgerStore for SqliteStore {
  type Error = crate::Error;

  // ── Snapshots ─────────────────────────────────────────────────────────────

  async fn upsert_by_hash(&self, input: NewSnapshot) -> Result<UpsertOutcome> {
    let table          = snapshot_table(input.module());
    let snapshot_id    = encode_uuid(Uuid::new_v4());
    let entity_key     = input.entity.entity_key();
    let entity_json    = serde_json::to_string(&input.entity)?;
    let data_json      = serde_json::to_string(&input.payload.data)?;
    let fact_version   = i64::from(input.payload.fact_version);
    let computed_at    = encode_dt(Utc::now());
    let NewSnapshot { tenant_id, fact_hash, computed_by, correlation_id, .. } =
      input;

    let (raw, created): (RawSnapshot, bool) = self
      .conn
      .call(move |conn| {
        // A concurrent writer with the same hash makes this a no-op; the
        // read-back below then returns the winner.
        let inserted = conn.execute(
          &format!(
            "INSERT INTO {table} (
               snapshot_id, tenant_id, entity_key, entity_json, data_json,
               fact_version, fact_hash, computed_at, computed_by, correlation_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (tenant_id, fact_hash) DO NOTHING"
          ),
          rusqlite::params![
            snapshot_id,
            tenant_id,
            entity_key,
            entity_json,
            data_json,
            fact_version,
            fact_hash,
            computed_at,
            computed_by,
            correlation_id,
          ],
        )?;

        let raw = conn.query_row(
          &format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM {table}
             WHERE tenant_id = ?1 AND fact_hash = ?2"
          ),
          rusqlite::params![tenant_id, fact_hash],
          RawSnapshot::from_row,
        )?;
        Ok((raw, inserted > 0))
      })
      .await?;

    if !created {
      debug!(fact_hash = %raw.fact_hash, "snapshot already stored; upsert is a no-op");
    }
    Ok(UpsertOutcome { snapshot: raw.into_snapshot()?, created })
  }

  async fn get_latest(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
  ) -> Result<Option<FactSnapshot>> {
    let mut page = self.list_snapshots(tenant_id, entity, 1, None).await?;
    Ok(page.pop())
  }

  async fn get_by_hash(
    &self,
    tenant_id: &str,
    module: FactModule,
    fact_hash: &str,
  ) -> Result<Option<FactSnapshot>> {
    let table     = snapshot_table(module);
    let tenant_id = tenant_id.to_owned();
    let fact_hash = fact_hash.to_owned();

    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM {table}
                 WHERE tenant_id = ?1 AND fact_hash = ?2"
              ),
              rusqlite::params![tenant_id, fact_hash],
              RawSnapshot::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn list_snapshots(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    limit: usize,
    before: Option<DateTime<Utc>>,
  ) -> Result<Vec<FactSnapshot>> {
    let table      = snapshot_table(entity.module());
    let tenant_id  = tenant_id.to_owned();
    let entity_key = entity.entity_key();
    let before_str = before.map(encode_dt);
    let limit_val  = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawSnapshot> = self
      .conn
      .call(move |conn| {
        // Insertion order (rowid) breaks ties between equal timestamps.
        let mut stmt = conn.prepare(&format!(
          "SELECT {SNAPSHOT_COLUMNS} FROM {table}
           WHERE tenant_id = ?1
             AND entity_key = ?2
             AND (?3 IS NULL OR computed_at < ?3)
           ORDER BY computed_at DESC, rowid DESC
           LIMIT ?4"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![tenant_id, entity_key, before_str, limit_val],
            RawSnapshot::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshot::into_snapshot).collect()
  }

  // ── Explanation cache ─────────────────────────────────────────────────────

  async fn get_explanation(
    &self,
    key: &ExplanationKey,
  ) -> Result<Option<CachedExplanation>> {
    let fact_hash = key.fact_hash.clone();
    let audience  = key.audience.as_str();
    let verbosity = key.verbosity.as_str();

    let raw: Option<RawExplanation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {EXPLANATION_COLUMNS} FROM explanation_cache
                 WHERE fact_hash = ?1 AND audience = ?2 AND verbosity = ?3"
              ),
              rusqlite::params![fact_hash, audience, verbosity],
              RawExplanation::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawExplanation::into_explanation).transpose()
  }

  async fn put_explanation(
    &self,
    input: NewExplanation,
  ) -> Result<CachedExplanation> {
    let result_json  = serde_json::to_string(&input.result)?;
    let generated_at = encode_dt(Utc::now());
    let audience     = input.key.audience.as_str();
    let verbosity    = input.key.verbosity.as_str();
    let module       = input.module.as_str();
    let NewExplanation { key, tenant_id, entity_key, provider, correlation_id, .. } =
      input;
    let fact_hash = key.fact_hash;

    let (raw, inserted): (RawExplanation, bool) = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT INTO explanation_cache (
             fact_hash, audience, verbosity, tenant_id, module, entity_key,
             result_json, provider, generated_at, correlation_id
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT (fact_hash, audience, verbosity) DO NOTHING",
          rusqlite::params![
            fact_hash,
            audience,
            verbosity,
            tenant_id,
            module,
            entity_key,
            result_json,
            provider,
            generated_at,
            correlation_id,
          ],
        )?;
        let raw = conn.query_row(
          &format!(
            "SELECT {EXPLANATION_COLUMNS} FROM explanation_cache
             WHERE fact_hash = ?1 AND audience = ?2 AND verbosity = ?3"
          ),
          rusqlite::params![fact_hash, audience, verbosity],
          RawExplanation::from_row,
        )?;
        Ok((raw, n > 0))
      })
      .await?;

    if !inserted {
      debug!(fact_hash = %raw.fact_hash, "explanation already cached; keeping existing row");
    }
    raw.into_explanation()
  }

  async fn latest_explanation_for_entity(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    audience: Audience,
    verbosity: Verbosity,
  ) -> Result<Option<CachedExplanation>> {
    let table      = snapshot_table(entity.module());
    let tenant_id  = tenant_id.to_owned();
    let entity_key = entity.entity_key();
    let audience   = audience.as_str();
    let verbosity  = verbosity.as_str();

    // Cache rows are keyed by hash alone, so ownership is established through
    // the tenant's own snapshots of the entity.
    let raw: Option<RawExplanation> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {cols} FROM explanation_cache e
           WHERE e.audience = ?3 AND e.verbosity = ?4
             AND e.fact_hash IN (
               SELECT s.fact_hash FROM {table} s
               WHERE s.tenant_id = ?1 AND s.entity_key = ?2
             )
           ORDER BY e.generated_at DESC, e.rowid DESC
           LIMIT 1",
          cols = qualified(EXPLANATION_COLUMNS, "e"),
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![tenant_id, entity_key, audience, verbosity],
              RawExplanation::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawExplanation::into_explanation).transpose()
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent> {
    let row = AuditRow::new(event)?;
    let raw = self.conn.call(move |conn| Ok(row.insert(conn)?)).await?;
    raw.into_event()
  }

  async fn append_fact_event(
    &self,
    event: NewAuditEvent,
    fact_hash: &str,
  ) -> Result<Option<AuditEvent>> {
    let row  = AuditRow::new(event)?;
    let hash = fact_hash.to_owned();

    // Check and insert run in one closure on the connection thread, so no
    // other statement can interleave.
    let raw: Option<RawAuditEvent> = self
      .conn
      .call(move |conn| {
        let recorded: bool = conn.query_row(
          "SELECT EXISTS (
             SELECT 1 FROM audit_events
             WHERE tenant_id = ?1
               AND event_type = ?2
               AND COALESCE(
                     json_extract(payload_json, '$.nextFactHash'),
                     json_extract(payload_json, '$.factHash')
                   ) = ?3
           )",
          rusqlite::params![row.tenant_id, row.event_type, hash],
          |r| r.get(0),
        )?;
        if recorded {
          return Ok(None);
        }
        Ok(Some(row.insert(conn)?))
      })
      .await?;

    if raw.is_none() {
      debug!(%fact_hash, "fact event already recorded");
    }
    raw.map(RawAuditEvent::into_event).transpose()
  }

  async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage> {
    use rusqlite::types::Value;

    let limit = query.effective_limit();

    let mut conds: Vec<&'static str> = vec!["tenant_id = ?"];
    let mut params: Vec<Value> = vec![Value::Text(query.tenant_id.clone())];

    if let Some(t) = query.actor_type {
      conds.push("actor_type = ?");
      params.push(Value::Text(t.as_str().to_owned()));
    }
    if let Some(c) = &query.correlation_id {
      conds.push("correlation_id = ?");
      params.push(Value::Text(c.clone()));
    }
    if let Some(m) = query.module {
      conds.push("module = ?");
      params.push(Value::Text(m.as_str().to_owned()));
    }
    if let Some(r) = &query.entity_ref {
      conds.push("evidence_ref = ?");
      params.push(Value::Text(r.clone()));
    }
    if let Some(t) = query.event_type {
      conds.push("event_type = ?");
      params.push(Value::Text(t.as_str().to_owned()));
    }
    if let Some(from) = query.from {
      conds.push("created_at >= ?");
      params.push(Value::Text(encode_dt(from)));
    }
    if let Some(to) = query.to {
      conds.push("created_at <= ?");
      params.push(Value::Text(encode_dt(to)));
    }
    if let Some(cursor) = query.cursor {
      conds.push("seq < ?");
      params.push(Value::Integer(cursor));
    }
    // One extra row tells us whether another page exists.
    params.push(Value::Integer(i64::try_from(limit + 1).unwrap_or(i64::MAX)));

    let sql = format!(
      "SELECT {AUDIT_COLUMNS} FROM audit_events
       WHERE {}
       ORDER BY seq DESC
       LIMIT ?",
      conds.join(" AND ")
    );

    let raws: Vec<RawAuditEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawAuditEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut items: Vec<AuditEvent> = raws
      .into_iter()
      .map(RawAuditEvent::into_event)
      .collect::<Result<_>>()?;

    let next_cursor = if items.len() > limit {
      items.truncate(limit);
      items.last().map(|e| e.seq)
    } else {
      None
    };

    Ok(AuditPage { items, next_cursor })
  }
}

// ─── Audit rows ──────────────────────────────────────────────────────────────

/// An audit event encoded for insertion.
struct AuditRow {
  event_id:        String,
  tenant_id:       String,
  actor_id:        Option<String>,
  actor_type:      &'static str,
  actor_client_id: Option<String>,
  event_type:      &'static str,
  module:          Option<&'static str>,
  summary:         String,
  evidence_ref:    Option<String>,
  payload_json:    String,
  correlation_id:  Option<String>,
  created_at:      String,
}

impl AuditRow {
  fn new(event: NewAuditEvent) -> Result<Self> {
    Ok(Self {
      event_id:        encode_uuid(Uuid::new_v4()),
      payload_json:    serde_json::to_string(&event.payload)?,
      actor_type:      event.actor_type.as_str(),
      event_type:      event.event_type.as_str(),
      module:          event.module.map(FactModule::as_str),
      created_at:      encode_dt(Utc::now()),
      tenant_id:       event.tenant_id,
      actor_id:        event.actor_id,
      actor_client_id: event.actor_client_id,
      summary:         event.summary,
      evidence_ref:    event.evidence_ref,
      correlation_id:  event.correlation_id,
    })
  }

  fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<RawAuditEvent> {
    conn.execute(
      "INSERT INTO audit_events (
         event_id, tenant_id, actor_id, actor_type, actor_client_id,
         event_type, module, summary, evidence_ref, payload_json,
         correlation_id, created_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
      rusqlite::params![
        self.event_id,
        self.tenant_id,
        self.actor_id,
        self.actor_type,
        self.actor_client_id,
        self.event_type,
        self.module,
        self.summary,
        self.evidence_ref,
        self.payload_json,
        self.correlation_id,
        self.created_at,
      ],
    )?;
    let seq = conn.last_insert_rowid();
    conn.query_row(
      &format!("SELECT {AUDIT_COLUMNS} FROM audit_events WHERE seq = ?1"),
      rusqlite::params![seq],
      RawAuditEvent::from_row,
    )
  }
}

/// Prefix each column in a comma-separated list with `alias.`.
fn qualified(columns: &str, alias: &str) -> String {
  columns
    .split(',')
    .map(|c| format!("{alias}.{}", c.trim()))
    .collect::<Vec<_>>()
    .join(", ")
}
