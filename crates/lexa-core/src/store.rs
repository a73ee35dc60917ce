//! The `LedgerStore` trait: snapshot store, explanation cache and audit sink.
//!
//! Implemented by storage backends (e.g. `lexa-store-sqlite`). The engine and
//! API depend on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  audit::{AuditEvent, AuditPage, AuditQuery, NewAuditEvent},
  entity::{EntityKeys, FactModule},
  explain::{Audience, CachedExplanation, ExplanationKey, NewExplanation, Verbosity},
  fact::{FactSnapshot, NewSnapshot, UpsertOutcome},
};

/// Abstraction over a Lexa storage backend.
///
/// Snapshots and audit events are append-only. Explanations are written at
/// most once per key; a losing concurrent writer gets the winner back.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait LedgerStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Snapshots ─────────────────────────────────────────────────────────

  /// Insert `input` unless a snapshot with the same `(tenant, fact_hash)`
  /// exists, in which case the existing row is returned with
  /// `created = false`. A uniqueness race counts as the latter.
  fn upsert_by_hash(
    &self,
    input: NewSnapshot,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + '_;

  /// The snapshot with the greatest `computed_at` for this entity.
  fn get_latest<'a>(
    &'a self,
    tenant_id: &'a str,
    entity: &'a EntityKeys,
  ) -> impl Future<Output = Result<Option<FactSnapshot>, Self::Error>> + Send + 'a;

  fn get_by_hash<'a>(
    &'a self,
    tenant_id: &'a str,
    module: FactModule,
    fact_hash: &'a str,
  ) -> impl Future<Output = Result<Option<FactSnapshot>, Self::Error>> + Send + 'a;

  /// Snapshot history for an entity, newest first. `before` excludes
  /// snapshots computed at or after that instant.
  fn list_snapshots<'a>(
    &'a self,
    tenant_id: &'a str,
    entity: &'a EntityKeys,
    limit: usize,
    before: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<FactSnapshot>, Self::Error>> + Send + 'a;

  // ── Explanation cache ─────────────────────────────────────────────────

  fn get_explanation<'a>(
    &'a self,
    key: &'a ExplanationKey,
  ) -> impl Future<Output = Result<Option<CachedExplanation>, Self::Error>>
  + Send
  + 'a;

  /// Store an explanation unless one exists for the key; returns the row
  /// that is stored afterwards.
  fn put_explanation(
    &self,
    input: NewExplanation,
  ) -> impl Future<Output = Result<CachedExplanation, Self::Error>> + Send + '_;

  /// The most recently generated explanation for an entity in the given
  /// presentation, regardless of which fact it explains.
  fn latest_explanation_for_entity<'a>(
    &'a self,
    tenant_id: &'a str,
    entity: &'a EntityKeys,
    audience: Audience,
    verbosity: Verbosity,
  ) -> impl Future<Output = Result<Option<CachedExplanation>, Self::Error>>
  + Send
  + 'a;

  // ── Audit ─────────────────────────────────────────────────────────────

  fn append_audit(
    &self,
    event: NewAuditEvent,
  ) -> impl Future<Output = Result<AuditEvent, Self::Error>> + Send + '_;

  /// Append `event` unless the tenant already has an event of the same type
  /// about `fact_hash` (its payload's `nextFactHash`, else `factHash`).
  /// Returns `None` when one was already recorded. The check and the insert
  /// are atomic, so redelivered and concurrent jobs record a fact once.
  fn append_fact_event<'a>(
    &'a self,
    event: NewAuditEvent,
    fact_hash: &'a str,
  ) -> impl Future<Output = Result<Option<AuditEvent>, Self::Error>> + Send + 'a;

  fn query_audit<'a>(
    &'a self,
    query: &'a AuditQuery,
  ) -> impl Future<Output = Result<AuditPage, Self::Error>> + Send + 'a;
}
