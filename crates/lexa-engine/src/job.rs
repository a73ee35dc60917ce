//! Job payloads and their outputs.
//!
//! Jobs are tagged variants dispatched on [`Job`]; each carries the explicit
//! tenant and entity it works on.

use lexa_core::{
  audit::Actor,
  entity::{EntityKeys, FactModule},
  evidence::EvidenceVerification,
  explain::{Audience, ExplanationResult, Verbosity},
  fact::FactSnapshot,
};
use serde::{Deserialize, Serialize};

/// Why a recompute was requested; recorded as the drift reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeTrigger {
  Manual,
  ExplainAutoRecompute,
  NightlyRefresh,
}

impl RecomputeTrigger {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Manual => "manual",
      Self::ExplainAutoRecompute => "explain_auto_recompute",
      Self::NightlyRefresh => "nightly_refresh",
    }
  }
}

#[derive(Debug, Clone)]
pub struct RecomputeJob {
  pub tenant_id:      String,
  pub entity:         EntityKeys,
  pub actor:          Actor,
  pub trigger:        RecomputeTrigger,
  pub correlation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExplainJob {
  pub tenant_id:      String,
  pub entity:         EntityKeys,
  pub fact_hash:      String,
  pub audience:       Audience,
  pub verbosity:      Verbosity,
  pub actor:          Actor,
  pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshReason {
  ScheduledNightly,
  Manual,
}

#[derive(Debug, Clone)]
pub struct NightlyRefreshJob {
  pub tenant_id:      String,
  pub reason:         RefreshReason,
  pub actor:          Actor,
  pub correlation_id: Option<String>,
}

/// Automatic check of one uploaded ESG evidence file.
#[derive(Debug, Clone)]
pub struct EvidenceJob {
  pub tenant_id:      String,
  pub loan_id:        String,
  pub evidence_id:    String,
  pub actor:          Actor,
  pub correlation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Job {
  Recompute(RecomputeJob),
  Explain(ExplainJob),
  NightlyRefresh(NightlyRefreshJob),
  VerifyEvidence(EvidenceJob),
}

impl Job {
  /// Stable job name, e.g. `esg_kpi.recompute`.
  pub fn name(&self) -> &'static str {
    match self {
      Self::Recompute(job) => recompute_job_name(job.entity.module()),
      Self::Explain(_) => "ai.explain",
      Self::NightlyRefresh(_) => "ops.nightly_refresh",
      Self::VerifyEvidence(_) => "esg.verify",
    }
  }

  pub fn tenant_id(&self) -> &str {
    match self {
      Self::Recompute(j) => &j.tenant_id,
      Self::Explain(j) => &j.tenant_id,
      Self::NightlyRefresh(j) => &j.tenant_id,
      Self::VerifyEvidence(j) => &j.tenant_id,
    }
  }
}

pub fn recompute_job_name(module: FactModule) -> &'static str {
  match module {
    FactModule::TradingReadiness => "trading.recompute",
    FactModule::EsgKpi => "esg_kpi.recompute",
    FactModule::Covenant => "covenant.recompute",
    FactModule::PortfolioRisk => "portfolio_risk.recompute",
  }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeOutcome {
  pub snapshot: FactSnapshot,
  /// `false` when the computed hash was already stored.
  pub created:  bool,
  pub drifted:  bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainOutcome {
  pub result:    ExplanationResult,
  pub fact_hash: String,
  /// `true` when served from the explanation cache.
  pub cached:    bool,
}

/// Aggregate counters of one nightly refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
  pub portfolio_refreshed: u32,
  pub loans_refreshed:     u32,
  pub kpis_refreshed:      u32,
  pub covenants_refreshed: u32,
  pub drift_detected:      u32,
  pub failed:              u32,
}

#[derive(Debug, Clone)]
pub enum JobOutput {
  Recomputed(RecomputeOutcome),
  Explained(ExplainOutcome),
  Refreshed(RefreshStats),
  Verified(EvidenceVerification),
}

impl JobOutput {
  pub fn into_recomputed(self) -> Option<RecomputeOutcome> {
    match self {
      Self::Recomputed(o) => Some(o),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn job_names_are_per_module() {
    let job = |entity| {
      Job::Recompute(RecomputeJob {
        tenant_id: "t1".into(),
        entity,
        actor: Actor::worker(),
        trigger: RecomputeTrigger::Manual,
        correlation_id: None,
      })
    };
    assert_eq!(job(EntityKeys::trading("l")).name(), "trading.recompute");
    assert_eq!(job(EntityKeys::esg_kpi("l", "k")).name(), "esg_kpi.recompute");
    assert_eq!(job(EntityKeys::covenant("l", "c")).name(), "covenant.recompute");
    assert_eq!(job(EntityKeys::portfolio(None)).name(), "portfolio_risk.recompute");

    let verify = Job::VerifyEvidence(EvidenceJob {
      tenant_id:      "t1".into(),
      loan_id:        "l".into(),
      evidence_id:    "e".into(),
      actor:          Actor::worker(),
      correlation_id: None,
    });
    assert_eq!(verify.name(), "esg.verify");
  }
}
