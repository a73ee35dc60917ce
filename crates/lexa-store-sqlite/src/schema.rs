//! SQL schema for the Lexa SQLite store.
//!
//! Executed once at connection startup. Snapshot tables share one shape and
//! are generated per fact module.

use lexa_core::entity::FactModule;

/// Table holding the snapshots of `module`.
pub fn snapshot_table(module: FactModule) -> &'static str {
  match module {
    FactModule::TradingReadiness => "trading_readiness_snapshots",
    FactModule::EsgKpi => "esg_kpi_snapshots",
    FactModule::Covenant => "covenant_snapshots",
    FactModule::PortfolioRisk => "portfolio_risk_snapshots",
  }
}

/// Shared tables; idempotent thanks to `IF NOT EXISTS`.
const BASE_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (fact_hash, audience, verbosity). Written once, never updated.
CREATE TABLE IF NOT EXISTS explanation_cache (
    fact_hash      TEXT NOT NULL,
    audience       TEXT NOT NULL,
    verbosity      TEXT NOT NULL,
    tenant_id      TEXT NOT NULL,
    module         TEXT NOT NULL,
    entity_key     TEXT NOT NULL,
    result_json    TEXT NOT NULL,
    provider       TEXT NOT NULL,
    generated_at   TEXT NOT NULL,   -- RFC 3339 UTC, microsecond precision
    correlation_id TEXT,
    UNIQUE (fact_hash, audience, verbosity)
);

CREATE INDEX IF NOT EXISTS explanation_cache_entity_idx
    ON explanation_cache(tenant_id, module, entity_key, generated_at);

-- Audit events are strictly append-only.
CREATE TABLE IF NOT EXISTS audit_events (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id        TEXT NOT NULL UNIQUE,
    tenant_id       TEXT NOT NULL,
    actor_id        TEXT,
    actor_type      TEXT NOT NULL,   -- 'USER' | 'SERVICE'
    actor_client_id TEXT,
    event_type      TEXT NOT NULL,
    module          TEXT,
    summary         TEXT NOT NULL,
    evidence_ref    TEXT,
    payload_json    TEXT NOT NULL,
    correlation_id  TEXT,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS audit_tenant_created_idx
    ON audit_events(tenant_id, created_at);
CREATE INDEX IF NOT EXISTS audit_correlation_idx
    ON audit_events(correlation_id);

CREATE TRIGGER IF NOT EXISTS audit_events_no_update
BEFORE UPDATE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
BEFORE DELETE ON audit_events
BEGIN
    SELECT RAISE(ABORT, 'audit_events is append-only');
END;
";

fn snapshot_ddl(table: &str) -> String {
  format!(
    "
CREATE TABLE IF NOT EXISTS {table} (
    snapshot_id    TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    entity_key     TEXT NOT NULL,
    entity_json    TEXT NOT NULL,   -- JSON-encoded EntityKeys
    data_json      TEXT NOT NULL,
    fact_version   INTEGER NOT NULL,
    fact_hash      TEXT NOT NULL,
    computed_at    TEXT NOT NULL,   -- RFC 3339 UTC, microsecond precision
    computed_by    TEXT NOT NULL,
    correlation_id TEXT,
    UNIQUE (tenant_id, fact_hash)
);

CREATE INDEX IF NOT EXISTS {table}_latest_idx
    ON {table}(tenant_id, entity_key, computed_at);

CREATE TRIGGER IF NOT EXISTS {table}_no_update
BEFORE UPDATE ON {table}
BEGIN
    SELECT RAISE(ABORT, '{table} is append-only');
END;

CREATE TRIGGER IF NOT EXISTS {table}_no_delete
BEFORE DELETE ON {table}
BEGIN
    SELECT RAISE(ABORT, '{table} is append-only');
END;
"
  )
}

/// Full schema DDL.
pub fn schema() -> String {
  let mut ddl = String::from(BASE_SCHEMA);
  for module in FactModule::ALL {
    ddl.push_str(&snapshot_ddl(snapshot_table(module)));
  }
  ddl.push_str("\nPRAGMA user_version = 1;\n");
  ddl
}
