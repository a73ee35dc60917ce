//! [`Engine`]: the job bodies (recompute, explain, evidence verification and
//! nightly refresh).
//!
//! Every job is bracketed by a started/completed audit pair, and every
//! failure path writes a failed record before the error propagates to the
//! queue's retry policy.

use lexa_core::{
  audit::{Actor, AuditEventType, NewAuditEvent},
  drift::DriftEvent,
  entity::{EntityKeys, FactModule},
  evidence::{self, EvidenceVerification},
  explain::{Audience, ExplanationInput, ExplanationKey, NewExplanation, Verbosity},
  fact::{FactSnapshot, NewSnapshot},
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::{
  EngineConfig, EngineError, Result,
  blob::fetch_with_backoff,
  job::{
    EvidenceJob, ExplainJob, ExplainOutcome, Job, JobOutput, NightlyRefreshJob,
    RecomputeJob, RecomputeOutcome, RecomputeTrigger, RefreshStats,
    recompute_job_name,
  },
  queue::JobHandler,
  ratelimit::{RateDecision, RateLimiter},
  retry::retry_with_backoff,
};

/// Runs queued jobs against a store, an upstream and an explanation
/// generator.
pub struct Engine<S, U, G> {
  store:     S,
  upstream:  U,
  generator: G,
  limiter:   RateLimiter,
  config:    EngineConfig,
}

impl<S, U, G> Engine<S, U, G>
where
  S: LedgerStore,
  U: Upstream,
  G: ExplanationGenerator,
{
  pub fn new(store: S, upstream: U, generator: G, config: EngineConfig) -> Self {
    Self { store, upstream, generator, limiter: RateLimiter::new(), config }
  }

  pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
    self.limiter = limiter;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  async fn audit(&self, event: NewAuditEvent) -> Result<()> {
    self.store.append_audit(event).await.map_err(EngineError::store)?;
    Ok(())
  }

  /// Record a failure without masking the error that caused it.
  async fn audit_failure(&self, event: NewAuditEvent) {
    if let Err(e) = self.audit(event).await {
      error!(error = %e, "failed to write failure audit event");
    }
  }

  // ── Recompute ─────────────────────────────────────────────────────────────

  /// Compute, hash and store the current fact for one entity, raising drift
  /// when the stored hash changes.
  pub async fn recompute(&self, job: &RecomputeJob) -> Result<RecomputeOutcome> {
    let name = recompute_job_name(job.entity.module());
    let base = |ty, summary: String| {
      NewAuditEvent::new(&job.tenant_id, &job.actor, ty, summary)
        .module(job.entity.module())
        .evidence_ref(job.entity.evidence_ref())
        .correlation_id(job.correlation_id.clone())
    };

    info!(job = name, tenant = %job.tenant_id, entity = %job.entity, "recompute started");
    self
      .audit(base(AuditEventType::JobStarted, format!("{name} started")).payload(json!({
        "job": name,
        "entity": job.entity,
        "trigger": job.trigger,
      })))
      .await?;

    match self.recompute_inner(job).await {
      Ok(outcome) => {
        self
          .audit(base(AuditEventType::JobCompleted, format!("{name} completed")).payload(
            json!({
              "job": name,
              "factHash": outcome.snapshot.fact_hash,
              "created": outcome.created,
              "drifted": outcome.drifted,
            }),
          ))
          .await?;
        info!(
          job = name,
          fact_hash = %outcome.snapshot.fact_hash,
          created = outcome.created,
          drifted = outcome.drifted,
          "recompute completed"
        );
        Ok(outcome)
      }
      Err(e) => {
        error!(job = name, entity = %job.entity, error = %e, "recompute failed");
        self
          .audit_failure(base(AuditEventType::JobFailed, format!("{name} failed")).payload(
            json!({ "job": name, "error": e.to_string(), "kind": e.kind() }),
          ))
          .await;
        Err(e)
      }
    }
  }

  async fn recompute_inner(&self, job: &RecomputeJob) -> Result<RecomputeOutcome> {
    validate_tenant(&job.tenant_id)?;
    job.entity.validate()?;

    let timeout = self.config.producer_timeout;
    let payload = retry_with_backoff(
      &self.config.retry,
      "producer.compute",
      EngineError::is_retryable,
      move || async move {
        tokio::time::timeout(timeout, self.upstream.compute(&job.tenant_id, &job.entity))
          .await
          .map_err(|_| EngineError::Timeout(timeout))?
          .map_err(EngineError::from)
      },
    )
    .await?;

    let new = NewSnapshot::new(&job.tenant_id, job.entity.clone(), payload, job.actor.label())?
      .with_correlation_id(job.correlation_id.clone());
    let outcome = self.store.upsert_by_hash(new).await.map_err(EngineError::store)?;
    if !outcome.created {
      debug!(entity = %job.entity, fact_hash = %outcome.snapshot.fact_hash, "fact unchanged");
    }

    // Fact events are recorded once per hash. A redelivery finds its row
    // already stored and writes whatever the failed delivery did not.
    self.record_computed(job, &outcome.snapshot).await?;
    let drifted = self.record_drift(job, &outcome.snapshot).await?;

    Ok(RecomputeOutcome { snapshot: outcome.snapshot, created: outcome.created, drifted })
  }

  async fn record_computed(&self, job: &RecomputeJob, snapshot: &FactSnapshot) -> Result<()> {
    let event = NewAuditEvent::new(
      &job.tenant_id,
      &job.actor,
      AuditEventType::FactComputed,
      format!("{} fact computed for {}", snapshot.module().label(), job.entity.entity_key()),
    )
    .module(snapshot.module())
    .evidence_ref(job.entity.evidence_ref())
    .payload(json!({
      "snapshotId": snapshot.snapshot_id,
      "factHash": snapshot.fact_hash,
      "factVersion": snapshot.fact_version,
    }))
    .correlation_id(job.correlation_id.clone());

    self
      .store
      .append_fact_event(event, &snapshot.fact_hash)
      .await
      .map_err(EngineError::store)?;
    Ok(())
  }

  /// Compare `snapshot` with the snapshot computed just before it. Returns
  /// `true` when this delivery recorded the drift.
  async fn record_drift(&self, job: &RecomputeJob, snapshot: &FactSnapshot) -> Result<bool> {
    let prev = self
      .store
      .list_snapshots(&job.tenant_id, &job.entity, 1, Some(snapshot.computed_at))
      .await
      .map_err(EngineError::store)?;
    let Some(drift) = DriftEvent::between(prev.first(), snapshot, job.trigger.as_str()) else {
      return Ok(false);
    };

    let recorded = self
      .store
      .append_fact_event(drift.to_audit(&job.actor, job.correlation_id.clone()), &drift.next_fact_hash)
      .await
      .map_err(EngineError::store)?;
    if recorded.is_some() {
      info!(
        entity = %job.entity,
        prev = %drift.prev_fact_hash,
        next = %drift.next_fact_hash,
        "fact drift detected"
      );
    }
    Ok(recorded.is_some())
  }

  // ── Explain ───────────────────────────────────────────────────────────────

  /// Explain `snapshot` for an audience, serving from the cache when the
  /// same `(fact_hash, audience, verbosity)` was explained before.
  pub async fn explain_snapshot(
    &self,
    snapshot: &FactSnapshot,
    audience: Audience,
    verbosity: Verbosity,
    actor: &Actor,
    correlation_id: Option<&str>,
  ) -> Result<ExplainOutcome> {
    let module = snapshot.module();
    let key = ExplanationKey::new(&snapshot.fact_hash, audience, verbosity);
    let base = |ty, summary: String| {
      NewAuditEvent::new(&snapshot.tenant_id, actor, ty, summary)
        .module(module)
        .evidence_ref(snapshot.entity.evidence_ref())
        .correlation_id(correlation_id.map(str::to_owned))
    };
    let presentation = json!({
      "factHash": snapshot.fact_hash,
      "audience": audience,
      "verbosity": verbosity,
    });

    if let Some(hit) = self.store.get_explanation(&key).await.map_err(EngineError::store)? {
      debug!(fact_hash = %snapshot.fact_hash, ?audience, ?verbosity, "explanation cache hit");
      self
        .audit(
          base(AuditEventType::ExplainCacheHit, format!("{} explanation served from cache", module.label()))
            .payload(with(&presentation, "provider", json!(hit.provider))),
        )
        .await?;
      return Ok(ExplainOutcome {
        result:    hit.result,
        fact_hash: snapshot.fact_hash.clone(),
        cached:    true,
      });
    }

    if let RateDecision::Denied { retry_after, limit } =
      self.limiter.check(&snapshot.tenant_id, &actor.label(), module)
    {
      warn!(tenant = %snapshot.tenant_id, actor = %actor.label(), %module, "explanation rate limited");
      self
        .audit(
          base(AuditEventType::AiRateLimitDenied, format!("{} explanation rate limited", module.label()))
            .payload(json!({
              "module": module,
              "limit": limit,
              "retryAfterSeconds": retry_after.as_secs(),
            })),
        )
        .await?;
      return Err(EngineError::RateLimited { retry_after });
    }

    let input = ExplanationInput { snapshot: snapshot.clone(), audience, verbosity };
    let timeout = self.config.generator_timeout;
    let generated = match tokio::time::timeout(timeout, self.generator.generate(&input)).await {
      Err(_) => Err(EngineError::Timeout(timeout)),
      Ok(res) => res.map_err(EngineError::from),
    };
    let result = match generated {
      Ok(result) => result,
      Err(e) => {
        warn!(fact_hash = %snapshot.fact_hash, error = %e, "explanation generation failed");
        self
          .audit_failure(
            base(AuditEventType::ExplainFailed, format!("{} explanation failed", module.label()))
              .payload(with(&presentation, "error", json!({ "kind": e.kind(), "message": e.to_string() }))),
          )
          .await;
        return Err(e);
      }
    };

    let stored = self
      .store
      .put_explanation(NewExplanation {
        key,
        tenant_id: snapshot.tenant_id.clone(),
        module,
        entity_key: snapshot.entity.entity_key(),
        result,
        provider: self.generator.name().to_owned(),
        correlation_id: correlation_id.map(str::to_owned),
      })
      .await
      .map_err(EngineError::store)?;

    info!(fact_hash = %snapshot.fact_hash, provider = %stored.provider, "explanation generated");
    self
      .audit(
        base(AuditEventType::ExplainGenerated, format!("{} explanation generated", module.label()))
          .payload(with(&presentation, "provider", json!(stored.provider))),
      )
      .await?;

    Ok(ExplainOutcome {
      result:    stored.result,
      fact_hash: snapshot.fact_hash.clone(),
      cached:    false,
    })
  }

  /// Queue body of `ai.explain`: explain the snapshot with a given hash.
  pub async fn run_explain_job(&self, job: &ExplainJob) -> Result<ExplainOutcome> {
    let name = "ai.explain";
    let module = job.entity.module();
    let base = |ty, summary: String| {
      NewAuditEvent::new(&job.tenant_id, &job.actor, ty, summary)
        .module(module)
        .evidence_ref(job.entity.evidence_ref())
        .correlation_id(job.correlation_id.clone())
    };

    self
      .audit(base(AuditEventType::JobStarted, format!("{name} started")).payload(json!({
        "job": name,
        "entity": job.entity,
        "factHash": job.fact_hash,
      })))
      .await?;

    let outcome = self.explain_job_inner(job).await;

    match outcome {
      Ok(outcome) => {
        self
          .audit(base(AuditEventType::JobCompleted, format!("{name} completed")).payload(json!({
            "job": name,
            "factHash": outcome.fact_hash,
            "cached": outcome.cached,
          })))
          .await?;
        Ok(outcome)
      }
      Err(e) => {
        error!(job = name, fact_hash = %job.fact_hash, error = %e, "explain job failed");
        self
          .audit_failure(base(AuditEventType::JobFailed, format!("{name} failed")).payload(
            json!({ "job": name, "error": e.to_string(), "kind": e.kind() }),
          ))
          .await;
        Err(e)
      }
    }
  }

  async fn explain_job_inner(&self, job: &ExplainJob) -> Result<ExplainOutcome> {
    validate_tenant(&job.tenant_id)?;
    let snapshot = self
      .store
      .get_by_hash(&job.tenant_id, job.entity.module(), &job.fact_hash)
      .await
      .map_err(EngineError::store)?
      .ok_or_else(|| EngineError::NotFound(format!("snapshot {}", job.fact_hash)))?;
    self
      .explain_snapshot(
        &snapshot,
        job.audience,
        job.verbosity,
        &job.actor,
        job.correlation_id.as_deref(),
      )
      .await
  }

  // ── Evidence ──────────────────────────────────────────────────────────────

  /// Queue body of `esg.verify`: fetch an evidence file and record its
  /// automatic assessment.
  pub async fn verify_evidence(&self, job: &EvidenceJob) -> Result<EvidenceVerification> {
    let name = "esg.verify";
    let base = |ty, summary: String| {
      NewAuditEvent::new(&job.tenant_id, &job.actor, ty, summary)
        .module(FactModule::EsgKpi)
        .evidence_ref(job.evidence_id.clone())
        .correlation_id(job.correlation_id.clone())
    };

    self
      .audit(base(AuditEventType::JobStarted, format!("{name} started")).payload(json!({
        "job": name,
        "loanId": job.loan_id,
        "evidenceId": job.evidence_id,
      })))
      .await?;

    match self.verify_inner(job).await {
      Ok(verification) => {
        self
          .audit(base(AuditEventType::JobCompleted, format!("{name} completed")).payload(json!({
            "job": name,
            "status": verification.status,
            "confidence": verification.confidence,
          })))
          .await?;
        Ok(verification)
      }
      Err(e) => {
        error!(job = name, evidence = %job.evidence_id, error = %e, "evidence verification failed");
        self
          .audit_failure(base(AuditEventType::JobFailed, format!("{name} failed")).payload(
            json!({ "job": name, "error": e.to_string(), "kind": e.kind() }),
          ))
          .await;
        Err(e)
      }
    }
  }

  async fn verify_inner(&self, job: &EvidenceJob) -> Result<EvidenceVerification> {
    validate_tenant(&job.tenant_id)?;
    if job.loan_id.trim().is_empty() || job.evidence_id.trim().is_empty() {
      return Err(EngineError::Validation("loan id and evidence id are required".into()));
    }

    let record = self.upstream.evidence(&job.tenant_id, &job.loan_id, &job.evidence_id).await?;
    let bytes = fetch_with_backoff(&self.upstream, &record.file_key, &self.config.retry).await?;
    let verification = evidence::assess(&record, bytes.len());
    info!(
      evidence = %record.evidence_id,
      status = verification.status.as_str(),
      bytes = bytes.len(),
      "evidence assessed"
    );

    self
      .audit(
        NewAuditEvent::new(
          &job.tenant_id,
          &job.actor,
          AuditEventType::EsgEvidenceVerified,
          format!(
            "ESG evidence verified: {} ({}%)",
            verification.status.as_str(),
            (verification.confidence * 100.0).round()
          ),
        )
        .module(FactModule::EsgKpi)
        .evidence_ref(record.evidence_id.clone())
        .payload(json!({
          "loanId": record.loan_id,
          "evidenceId": record.evidence_id,
          "status": verification.status,
          "confidence": verification.confidence,
          "notes": verification.notes,
          "fileKey": record.file_key,
          "contentType": record.content_type,
          "bytes": verification.bytes,
        }))
        .correlation_id(job.correlation_id.clone()),
      )
      .await?;

    Ok(verification)
  }

  // ── Nightly refresh ───────────────────────────────────────────────────────

  /// Recompute the tenant portfolio and the top-N recently touched loans with
  /// their KPIs and covenants, one after another.
  pub async fn nightly_refresh(&self, job: &NightlyRefreshJob) -> Result<RefreshStats> {
    let name = "ops.nightly_refresh";
    let base = |ty, summary: String| {
      NewAuditEvent::new(&job.tenant_id, &job.actor, ty, summary)
        .correlation_id(job.correlation_id.clone())
    };

    info!(tenant = %job.tenant_id, reason = ?job.reason, "nightly refresh started");
    self
      .audit(base(AuditEventType::OpsJobStarted, format!("{name} started")).payload(json!({
        "job": name,
        "reason": job.reason,
      })))
      .await?;

    match self.refresh_inner(job).await {
      Ok(stats) => {
        info!(tenant = %job.tenant_id, ?stats, "nightly refresh completed");
        self
          .audit(base(AuditEventType::OpsJobCompleted, format!("{name} completed")).payload(
            json!({ "job": name, "reason": job.reason, "stats": stats }),
          ))
          .await?;
        Ok(stats)
      }
      Err(e) => {
        error!(tenant = %job.tenant_id, error = %e, "nightly refresh failed");
        self
          .audit_failure(base(AuditEventType::OpsJobFailed, format!("{name} failed")).payload(
            json!({ "job": name, "error": e.to_string(), "kind": e.kind() }),
          ))
          .await;
        Err(e)
      }
    }
  }

  async fn refresh_inner(&self, job: &NightlyRefreshJob) -> Result<RefreshStats> {
    validate_tenant(&job.tenant_id)?;
    let top_n = self.config.refresh_top_n;
    let tenant = job.tenant_id.as_str();
    let mut stats = RefreshStats::default();

    if self.refresh_one(job, EntityKeys::portfolio(None), &mut stats).await {
      stats.portfolio_refreshed += 1;
    }

    let loans = self.upstream.recent_loans(tenant, top_n).await?;
    for loan_id in &loans {
      if self.refresh_one(job, EntityKeys::trading(loan_id.as_str()), &mut stats).await {
        stats.loans_refreshed += 1;
      }

      for kpi_id in self.upstream.kpis_for_loan(tenant, loan_id, top_n).await? {
        if self.refresh_one(job, EntityKeys::esg_kpi(loan_id.as_str(), kpi_id), &mut stats).await {
          stats.kpis_refreshed += 1;
        }
      }

      for covenant_id in self.upstream.covenants_for_loan(tenant, loan_id, top_n).await? {
        if self
          .refresh_one(job, EntityKeys::covenant(loan_id.as_str(), covenant_id), &mut stats)
          .await
        {
          stats.covenants_refreshed += 1;
        }
      }
    }

    Ok(stats)
  }

  /// One entity of a refresh. Failures are counted, not propagated, so a bad
  /// entity does not abort the run.
  async fn refresh_one(
    &self,
    job: &NightlyRefreshJob,
    entity: EntityKeys,
    stats: &mut RefreshStats,
  ) -> bool {
    let recompute = RecomputeJob {
      tenant_id: job.tenant_id.clone(),
      entity,
      actor: job.actor.clone(),
      trigger: RecomputeTrigger::NightlyRefresh,
      correlation_id: job.correlation_id.clone(),
    };
    match self.recompute(&recompute).await {
      Ok(outcome) => {
        if outcome.drifted {
          stats.drift_detected += 1;
        }
        true
      }
      Err(e) => {
        warn!(entity = %recompute.entity, error = %e, "refresh of entity failed");
        stats.failed += 1;
        false
      }
    }
  }

}

impl<S, U, G> JobHandler for Engine<S, U, G>
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  async fn handle(&self, job: &Job) -> Result<JobOutput> {
    match job {
      Job::Recompute(j) => self.recompute(j).await.map(JobOutput::Recomputed),
      Job::Explain(j) => self.run_explain_job(j).await.map(JobOutput::Explained),
      Job::NightlyRefresh(j) => self.nightly_refresh(j).await.map(JobOutput::Refreshed),
      Job::VerifyEvidence(j) => self.verify_evidence(j).await.map(JobOutput::Verified),
    }
  }
}

fn validate_tenant(tenant_id: &str) -> Result<()> {
  if tenant_id.trim().is_empty() {
    return Err(EngineError::Validation("tenant id is empty".into()));
  }
  Ok(())
}

/// `base` with one extra top-level field.
fn with(base: &Value, key: &str, value: Value) -> Value {
  let mut out = base.clone();
  if let Value::Object(map) = &mut out {
    map.insert(key.to_owned(), value);
  }
  out
}
