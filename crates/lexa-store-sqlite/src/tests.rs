//! Integration tests for `SqliteStore` against an in-memory database.

use std::time::Duration;

use lexa_core::{
  audit::{Actor, ActorType, AuditEventType, AuditQuery, NewAuditEvent},
  entity::{EntityKeys, FactModule},
  explain::{
    Audience, Confidence, ExplanationKey, ExplanationResult, NewExplanation,
    Verbosity,
  },
  fact::{FactPayload, NewSnapshot},
  store::LedgerStore,
};
use serde_json::json;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn snapshot(tenant: &str, entity: EntityKeys, score: i64) -> NewSnapshot {
  NewSnapshot::new(
    tenant,
    entity,
    FactPayload::new(1, json!({ "score": score, "band": "AMBER" })),
    "test",
  )
  .unwrap()
}

fn result(summary: &str) -> ExplanationResult {
  ExplanationResult {
    summary:         summary.into(),
    explanation:     vec!["because".into()],
    recommendations: vec![],
    confidence:      Confidence::High,
    version:         1,
  }
}

fn new_explanation(tenant: &str, hash: &str, summary: &str) -> NewExplanation {
  NewExplanation {
    key:            ExplanationKey::new(hash, Audience::TradingViewer, Verbosity::Standard),
    tenant_id:      tenant.into(),
    module:         FactModule::TradingReadiness,
    entity_key:     "loan-1".into(),
    result:         result(summary),
    provider:       "test".into(),
    correlation_id: None,
  }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_is_idempotent_per_hash() {
  let s = store().await;
  let entity = EntityKeys::trading("loan-1");

  let first = s.upsert_by_hash(snapshot("t1", entity.clone(), 75)).await.unwrap();
  assert!(first.created);

  let second = s.upsert_by_hash(snapshot("t1", entity.clone(), 75)).await.unwrap();
  assert!(!second.created);
  assert_eq!(second.snapshot.snapshot_id, first.snapshot.snapshot_id);
  assert_eq!(second.snapshot.computed_at, first.snapshot.computed_at);

  let all = s.list_snapshots("t1", &entity, 10, None).await.unwrap();
  assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn same_hash_in_other_tenant_is_a_new_row() {
  let s = store().await;
  let entity = EntityKeys::trading("loan-1");
  let a = s.upsert_by_hash(snapshot("t1", entity.clone(), 75)).await.unwrap();
  let b = s.upsert_by_hash(snapshot("t2", entity.clone(), 75)).await.unwrap();
  assert!(a.created && b.created);
  assert_eq!(a.snapshot.fact_hash, b.snapshot.fact_hash);
  assert_ne!(a.snapshot.snapshot_id, b.snapshot.snapshot_id);
}

#[tokio::test]
async fn latest_follows_computed_at() {
  let s = store().await;
  let entity = EntityKeys::trading("loan-1");
  assert!(s.get_latest("t1", &entity).await.unwrap().is_none());

  let h1 = s.upsert_by_hash(snapshot("t1", entity.clone(), 75)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(2)).await;
  let h2 = s.upsert_by_hash(snapshot("t1", entity.clone(), 60)).await.unwrap();

  let latest = s.get_latest("t1", &entity).await.unwrap().unwrap();
  assert_eq!(latest.fact_hash, h2.snapshot.fact_hash);

  let history = s.list_snapshots("t1", &entity, 10, None).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[1].fact_hash, h1.snapshot.fact_hash);

  let older = s
    .list_snapshots("t1", &entity, 10, Some(h2.snapshot.computed_at))
    .await
    .unwrap();
  assert_eq!(older.len(), 1);
  assert_eq!(older[0].fact_hash, h1.snapshot.fact_hash);
}

#[tokio::test]
async fn entities_and_modules_are_isolated() {
  let s = store().await;
  s.upsert_by_hash(snapshot("t1", EntityKeys::trading("loan-1"), 75))
    .await
    .unwrap();
  let kpi = EntityKeys::esg_kpi("loan-1", "kpi-1");
  assert!(s.get_latest("t1", &kpi).await.unwrap().is_none());
  assert!(
    s.get_latest("t1", &EntityKeys::trading("loan-2"))
      .await
      .unwrap()
      .is_none()
  );

  let stored = s.upsert_by_hash(snapshot("t1", kpi.clone(), 1)).await.unwrap();
  let found = s
    .get_by_hash("t1", FactModule::EsgKpi, &stored.snapshot.fact_hash)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.entity, kpi);
  assert!(
    s.get_by_hash("t1", FactModule::Covenant, &stored.snapshot.fact_hash)
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn snapshot_rows_cannot_be_updated() {
  let s = store().await;
  s.upsert_by_hash(snapshot("t1", EntityKeys::trading("loan-1"), 75))
    .await
    .unwrap();
  let res = s
    .conn
    .call(|conn| {
      conn.execute("UPDATE trading_readiness_snapshots SET computed_by = 'x'", [])?;
      Ok(())
    })
    .await;
  assert!(res.is_err());
}

// ─── Explanation cache ───────────────────────────────────────────────────────

#[tokio::test]
async fn explanation_is_written_once_per_key() {
  let s = store().await;
  let first = s.put_explanation(new_explanation("t1", "h1", "first")).await.unwrap();
  let second = s.put_explanation(new_explanation("t1", "h1", "second")).await.unwrap();
  assert_eq!(first.result.summary, "first");
  assert_eq!(second.result.summary, "first");

  let key = ExplanationKey::new("h1", Audience::TradingViewer, Verbosity::Standard);
  let cached = s.get_explanation(&key).await.unwrap().unwrap();
  assert_eq!(cached, first);

  let other = ExplanationKey::new("h1", Audience::Investor, Verbosity::Standard);
  assert!(s.get_explanation(&other).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_explanation_for_entity_uses_tenant_snapshots() {
  let s = store().await;
  let entity = EntityKeys::trading("loan-1");
  let h1 = s.upsert_by_hash(snapshot("t1", entity.clone(), 75)).await.unwrap();
  s.put_explanation(new_explanation("t1", &h1.snapshot.fact_hash, "old"))
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(2)).await;
  let h2 = s.upsert_by_hash(snapshot("t1", entity.clone(), 60)).await.unwrap();
  s.put_explanation(new_explanation("t1", &h2.snapshot.fact_hash, "new"))
    .await
    .unwrap();

  let latest = s
    .latest_explanation_for_entity("t1", &entity, Audience::TradingViewer, Verbosity::Standard)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(latest.result.summary, "new");

  assert!(
    s.latest_explanation_for_entity("t2", &entity, Audience::TradingViewer, Verbosity::Standard)
      .await
      .unwrap()
      .is_none()
  );
  assert!(
    s.latest_explanation_for_entity("t1", &entity, Audience::Investor, Verbosity::Standard)
      .await
      .unwrap()
      .is_none()
  );
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn audit(tenant: &str, ty: AuditEventType, corr: &str) -> NewAuditEvent {
  NewAuditEvent::new(tenant, &Actor::worker(), ty, "summary")
    .module(FactModule::TradingReadiness)
    .evidence_ref("loan-1")
    .payload(json!({ "k": 1 }))
    .correlation_id(Some(corr.into()))
}

#[tokio::test]
async fn audit_append_and_filter() {
  let s = store().await;
  s.append_audit(audit("t1", AuditEventType::JobStarted, "c1")).await.unwrap();
  s.append_audit(audit("t1", AuditEventType::JobCompleted, "c1")).await.unwrap();
  s.append_audit(audit("t1", AuditEventType::JobStarted, "c2")).await.unwrap();
  s.append_audit(audit("t2", AuditEventType::JobStarted, "c1")).await.unwrap();
  let user = Actor::user("u-1", vec![]);
  s.append_audit(NewAuditEvent::new("t1", &user, AuditEventType::ExplainCacheHit, "hit"))
    .await
    .unwrap();

  let all = s.query_audit(&AuditQuery::for_tenant("t1")).await.unwrap();
  assert_eq!(all.items.len(), 4);
  assert!(all.next_cursor.is_none());
  // Newest first.
  assert_eq!(all.items[0].event_type, AuditEventType::ExplainCacheHit);
  assert_eq!(all.items[0].actor_id.as_deref(), Some("u-1"));

  let mut q = AuditQuery::for_tenant("t1");
  q.correlation_id = Some("c1".into());
  let page = s.query_audit(&q).await.unwrap();
  assert_eq!(page.items.len(), 2);

  let mut q = AuditQuery::for_tenant("t1");
  q.event_type = Some(AuditEventType::JobStarted);
  q.entity_ref = Some("loan-1".into());
  q.actor_type = Some(ActorType::Service);
  let page = s.query_audit(&q).await.unwrap();
  assert_eq!(page.items.len(), 2);
  assert_eq!(page.items[0].payload, json!({ "k": 1 }));
  assert_eq!(page.items[0].module, Some(FactModule::TradingReadiness));
}

#[tokio::test]
async fn audit_pagination_uses_cursor() {
  let s = store().await;
  for _ in 0..5 {
    s.append_audit(audit("t1", AuditEventType::JobStarted, "c")).await.unwrap();
  }
  let mut q = AuditQuery::for_tenant("t1");
  q.limit = Some(2);

  let mut seen = Vec::new();
  loop {
    let page = s.query_audit(&q).await.unwrap();
    seen.extend(page.items.iter().map(|e| e.seq));
    match page.next_cursor {
      Some(c) => q.cursor = Some(c),
      None => break,
    }
  }
  assert_eq!(seen.len(), 5);
  assert!(seen.windows(2).all(|w| w[0] > w[1]));
}

#[tokio::test]
async fn audit_rows_cannot_be_deleted() {
  let s = store().await;
  s.append_audit(audit("t1", AuditEventType::JobStarted, "c")).await.unwrap();
  let res = s
    .conn
    .call(|conn| {
      conn.execute("DELETE FROM audit_events", [])?;
      Ok(())
    })
    .await;
  assert!(res.is_err());
  let page = s.query_audit(&AuditQuery::for_tenant("t1")).await.unwrap();
  assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn fact_events_are_recorded_once_per_hash() {
  let s = store().await;
  let computed = |tenant: &str, hash: &str| {
    NewAuditEvent::new(tenant, &Actor::worker(), AuditEventType::FactComputed, "computed")
      .payload(json!({ "factHash": hash }))
  };
  let drift = |hash: &str| {
    NewAuditEvent::new("t1", &Actor::worker(), AuditEventType::FactDriftDetected, "drift")
      .payload(json!({ "prevFactHash": "h0", "nextFactHash": hash }))
  };

  assert!(s.append_fact_event(computed("t1", "h1"), "h1").await.unwrap().is_some());
  assert!(s.append_fact_event(computed("t1", "h1"), "h1").await.unwrap().is_none());
  // Other hashes, tenants and event types are independent.
  assert!(s.append_fact_event(computed("t1", "h2"), "h2").await.unwrap().is_some());
  assert!(s.append_fact_event(computed("t2", "h1"), "h1").await.unwrap().is_some());
  assert!(s.append_fact_event(drift("h1"), "h1").await.unwrap().is_some());
  assert!(s.append_fact_event(drift("h1"), "h1").await.unwrap().is_none());
  // The previous hash of a drift does not count as its subject.
  assert!(s.append_fact_event(drift("h0"), "h0").await.unwrap().is_some());

  let mut q = AuditQuery::for_tenant("t1");
  q.event_type = Some(AuditEventType::FactComputed);
  assert_eq!(s.query_audit(&q).await.unwrap().items.len(), 2);
}
