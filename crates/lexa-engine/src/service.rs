//! [`FactService`]: the request-facing entry points.
//!
//! Reads go straight to the store. Writes go through the job queue so that
//! user-triggered and scheduled work share one execution and retry path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lexa_core::{
  audit::{Actor, AuditPage, AuditQuery},
  entity::EntityKeys,
  explain::{Audience, LatestExplanation, Verbosity},
  fact::FactSnapshot,
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Engine, EngineError, Result,
  job::{
    EvidenceJob, ExplainJob, ExplainOutcome, Job, JobOutput, NightlyRefreshJob,
    RecomputeJob, RecomputeOutcome, RecomputeTrigger, RefreshReason,
  },
  queue::{JobHandle, JobQueue, WorkerPool},
};

/// Largest page of snapshot history served in one call.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Result of a user-requested recompute.
#[derive(Debug, Clone)]
pub enum RecomputeStatus {
  /// The job finished within the wait window.
  Completed(RecomputeOutcome),
  /// The job is still queued or running.
  Pending { job_id: Uuid },
}

pub struct FactService<S, U, G> {
  engine: Arc<Engine<S, U, G>>,
  queue:  JobQueue,
}

impl<S, U, G> Clone for FactService<S, U, G> {
  fn clone(&self) -> Self {
    Self { engine: Arc::clone(&self.engine), queue: self.queue.clone() }
  }
}

impl<S, U, G> FactService<S, U, G>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  /// Start a worker pool for `engine` and wrap both. The pool must be kept
  /// alive for as long as the service is used; dropping it stops the workers.
  pub fn start(engine: Engine<S, U, G>) -> (Self, WorkerPool) {
    let engine = Arc::new(engine);
    let config = engine.config();
    let (queue, pool) =
      WorkerPool::start(Arc::clone(&engine), config.workers, config.retry);
    (Self { engine, queue }, pool)
  }

  pub fn engine(&self) -> &Engine<S, U, G> { &self.engine }

  pub fn queue(&self) -> &JobQueue { &self.queue }

  // ── Facts ─────────────────────────────────────────────────────────────────

  pub async fn latest_snapshot(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
  ) -> Result<Option<FactSnapshot>> {
    entity.validate()?;
    self.engine.store().get_latest(tenant_id, entity).await.map_err(EngineError::store)
  }

  /// Snapshot history, newest first. `limit` is clamped to
  /// `1..=MAX_HISTORY_LIMIT`.
  pub async fn list_snapshots(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    limit: usize,
    before: Option<DateTime<Utc>>,
  ) -> Result<Vec<FactSnapshot>> {
    entity.validate()?;
    self
      .engine
      .store()
      .list_snapshots(tenant_id, entity, limit.clamp(1, MAX_HISTORY_LIMIT), before)
      .await
      .map_err(EngineError::store)
  }

  fn enqueue_recompute(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    actor: &Actor,
    trigger: RecomputeTrigger,
    correlation_id: Option<&str>,
  ) -> Result<JobHandle> {
    self.queue.enqueue(Job::Recompute(RecomputeJob {
      tenant_id: tenant_id.to_owned(),
      entity: entity.clone(),
      actor: actor.clone(),
      trigger,
      correlation_id: correlation_id.map(str::to_owned),
    }))
  }

  /// Enqueue a recompute and wait up to `recompute_wait` for it. When the
  /// fact drifted and `explain_on_drift` is set, an explanation of the new
  /// fact is queued for the default audience.
  pub async fn recompute_facts(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<RecomputeStatus> {
    entity.validate()?;
    let mut handle =
      self.enqueue_recompute(tenant_id, entity, actor, RecomputeTrigger::Manual, correlation_id)?;

    let outcome = match handle.wait(self.engine.config().recompute_wait).await {
      Ok(output) => recomputed(output)?,
      Err(EngineError::Timeout(_)) => {
        info!(job_id = %handle.id(), entity = %entity, "recompute still running");
        return Ok(RecomputeStatus::Pending { job_id: handle.id() });
      }
      Err(e) => return Err(e),
    };

    if outcome.drifted && self.engine.config().explain_on_drift {
      let job_id = self.queue.submit(Job::Explain(ExplainJob {
        tenant_id: tenant_id.to_owned(),
        entity: entity.clone(),
        fact_hash: outcome.snapshot.fact_hash.clone(),
        audience: Audience::default(),
        verbosity: Verbosity::Standard,
        actor: actor.clone(),
        correlation_id: correlation_id.map(str::to_owned),
      }))?;
      debug!(%job_id, fact_hash = %outcome.snapshot.fact_hash, "explanation queued for drift");
    }

    Ok(RecomputeStatus::Completed(outcome))
  }

  // ── Explanations ──────────────────────────────────────────────────────────

  /// Explain the latest fact of an entity. When the entity has no fact yet,
  /// one recompute is enqueued and awaited for `explain_wait`, then the
  /// lookup is retried exactly once.
  pub async fn explain(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    audience: Audience,
    verbosity: Verbosity,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<ExplainOutcome> {
    let snapshot = match self.latest_snapshot(tenant_id, entity).await? {
      Some(snapshot) => snapshot,
      None => {
        self.recompute_for_explain(tenant_id, entity, actor, correlation_id).await?;
        self
          .latest_snapshot(tenant_id, entity)
          .await?
          .ok_or_else(|| EngineError::NoFacts(entity.to_string()))?
      }
    };

    self
      .engine
      .explain_snapshot(&snapshot, audience, verbosity, actor, correlation_id)
      .await
  }

  async fn recompute_for_explain(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<()> {
    info!(tenant = tenant_id, entity = %entity, "no fact yet; recomputing before explain");
    let mut handle = self.enqueue_recompute(
      tenant_id,
      entity,
      actor,
      RecomputeTrigger::ExplainAutoRecompute,
      correlation_id,
    )?;
    match handle.wait(self.engine.config().explain_wait).await {
      Ok(_) => Ok(()),
      Err(e) if e.is_retryable() => {
        warn!(job_id = %handle.id(), error = %e, "recompute for explain did not finish");
        Err(EngineError::FactsNotReady(entity.to_string()))
      }
      // The follow-up lookup reports the missing fact.
      Err(e) => {
        warn!(job_id = %handle.id(), error = %e, "recompute for explain failed");
        Ok(())
      }
    }
  }

  /// The newest explanation of an entity together with whether it still
  /// describes the entity's latest fact.
  pub async fn latest_explanation(
    &self,
    tenant_id: &str,
    entity: &EntityKeys,
    audience: Audience,
    verbosity: Verbosity,
  ) -> Result<LatestExplanation> {
    entity.validate()?;
    let store = self.engine.store();
    let explanation = store
      .latest_explanation_for_entity(tenant_id, entity, audience, verbosity)
      .await
      .map_err(EngineError::store)?;
    let latest = store.get_latest(tenant_id, entity).await.map_err(EngineError::store)?;
    Ok(LatestExplanation::new(explanation, latest.map(|s| s.fact_hash)))
  }

  // ── Audit & ops ───────────────────────────────────────────────────────────

  pub async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage> {
    self.engine.store().query_audit(query).await.map_err(EngineError::store)
  }

  /// Queue a refresh of the tenant's portfolio and recently touched loans.
  pub fn request_refresh(
    &self,
    tenant_id: &str,
    reason: RefreshReason,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<Uuid> {
    if tenant_id.trim().is_empty() {
      return Err(EngineError::Validation("tenant id is empty".into()));
    }
    self.queue.submit(Job::NightlyRefresh(NightlyRefreshJob {
      tenant_id: tenant_id.to_owned(),
      reason,
      actor: actor.clone(),
      correlation_id: correlation_id.map(str::to_owned),
    }))
  }

  // ── ESG evidence ──────────────────────────────────────────────────────────

  /// Queue an automatic check of one uploaded evidence file.
  pub fn verify_evidence(
    &self,
    tenant_id: &str,
    loan_id: &str,
    evidence_id: &str,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<Uuid> {
    if tenant_id.trim().is_empty() {
      return Err(EngineError::Validation("tenant id is empty".into()));
    }
    if loan_id.trim().is_empty() || evidence_id.trim().is_empty() {
      return Err(EngineError::Validation("loan id and evidence id are required".into()));
    }
    self.queue.submit(Job::VerifyEvidence(EvidenceJob {
      tenant_id: tenant_id.to_owned(),
      loan_id: loan_id.to_owned(),
      evidence_id: evidence_id.to_owned(),
      actor: actor.clone(),
      correlation_id: correlation_id.map(str::to_owned),
    }))
  }
}

fn recomputed(output: JobOutput) -> Result<RecomputeOutcome> {
  output
    .into_recomputed()
    .ok_or_else(|| EngineError::Transient("recompute job returned another output".into()))
}
