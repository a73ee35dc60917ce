//! Explanation types and the cache key they are stored under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, entity::FactModule, fact::FactSnapshot};

// ─── Presentation ────────────────────────────────────────────────────────────

/// Who an explanation is written for.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Audience {
  TradingAnalyst,
  #[default]
  TradingViewer,
  Investor,
  Compliance,
}

impl Audience {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::TradingAnalyst => "TRADING_ANALYST",
      Self::TradingViewer => "TRADING_VIEWER",
      Self::Investor => "INVESTOR",
      Self::Compliance => "COMPLIANCE",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    [
      Self::TradingAnalyst,
      Self::TradingViewer,
      Self::Investor,
      Self::Compliance,
    ]
    .into_iter()
    .find(|a| a.as_str() == s)
    .ok_or_else(|| Error::UnknownVariant { kind: "audience", value: s.to_owned() })
  }

  /// Pick the audience for a caller from their role names. Analysts win over
  /// auditors; everyone else gets the viewer audience.
  pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
    let has = |name: &str| roles.iter().any(|r| r.as_ref() == name);
    if has("TRADING_ANALYST") {
      Self::TradingAnalyst
    } else if has("COMPLIANCE_AUDITOR") {
      Self::Compliance
    } else {
      Self::TradingViewer
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verbosity {
  Short,
  #[default]
  Standard,
  Detailed,
}

impl Verbosity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Short => "SHORT",
      Self::Standard => "STANDARD",
      Self::Detailed => "DETAILED",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "SHORT" => Ok(Self::Short),
      "STANDARD" => Ok(Self::Standard),
      "DETAILED" => Ok(Self::Detailed),
      other => Err(Error::UnknownVariant {
        kind:  "verbosity",
        value: other.to_owned(),
      }),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
  High,
  Medium,
  Low,
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// The generated explanation of one fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplanationResult {
  pub summary:         String,
  pub explanation:     Vec<String>,
  #[serde(default)]
  pub recommendations: Vec<String>,
  pub confidence:      Confidence,
  pub version:         u32,
}

/// The cache key. The fact hash already covers the entity, so the same key
/// always describes the same explanation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExplanationKey {
  pub fact_hash: String,
  pub audience:  Audience,
  pub verbosity: Verbosity,
}

impl ExplanationKey {
  pub fn new(
    fact_hash: impl Into<String>,
    audience: Audience,
    verbosity: Verbosity,
  ) -> Self {
    Self { fact_hash: fact_hash.into(), audience, verbosity }
  }
}

/// What the generator is asked to explain.
#[derive(Debug, Clone)]
pub struct ExplanationInput {
  pub snapshot:  FactSnapshot,
  pub audience:  Audience,
  pub verbosity: Verbosity,
}

/// A cached explanation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedExplanation {
  pub fact_hash:      String,
  pub audience:       Audience,
  pub verbosity:      Verbosity,
  pub tenant_id:      String,
  pub module:         FactModule,
  pub entity_key:     String,
  pub result:         ExplanationResult,
  /// Name of the generator that produced `result`.
  pub provider:       String,
  pub generated_at:   DateTime<Utc>,
  pub correlation_id: Option<String>,
}

impl CachedExplanation {
  pub fn key(&self) -> ExplanationKey {
    ExplanationKey::new(&self.fact_hash, self.audience, self.verbosity)
  }
}

/// Input to [`crate::store::LedgerStore::put_explanation`].
#[derive(Debug, Clone)]
pub struct NewExplanation {
  pub key:            ExplanationKey,
  pub tenant_id:      String,
  pub module:         FactModule,
  pub entity_key:     String,
  pub result:         ExplanationResult,
  pub provider:       String,
  pub correlation_id: Option<String>,
}

/// The most recent explanation for an entity compared against its latest
/// fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestExplanation {
  pub explanation:      Option<CachedExplanation>,
  pub latest_fact_hash: Option<String>,
  /// `true` when an explanation exists but was generated for an older fact.
  pub is_stale:         bool,
}

impl LatestExplanation {
  pub fn new(
    explanation: Option<CachedExplanation>,
    latest_fact_hash: Option<String>,
  ) -> Self {
    let is_stale = match (&explanation, &latest_fact_hash) {
      (Some(e), Some(h)) => &e.fact_hash != h,
      _ => false,
    };
    Self { explanation, latest_fact_hash, is_stale }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn audience_from_roles() {
    assert_eq!(
      Audience::from_roles(&["TRADING_ANALYST", "COMPLIANCE_AUDITOR"]),
      Audience::TradingAnalyst
    );
    assert_eq!(Audience::from_roles(&["COMPLIANCE_AUDITOR"]), Audience::Compliance);
    assert_eq!(Audience::from_roles(&["RISK_OFFICER"]), Audience::TradingViewer);
    assert_eq!(Audience::from_roles::<String>(&[]), Audience::default());
  }

  #[test]
  fn presentation_strings_parse() {
    for a in [
      Audience::TradingAnalyst,
      Audience::TradingViewer,
      Audience::Investor,
      Audience::Compliance,
    ] {
      assert_eq!(Audience::parse(a.as_str()).unwrap(), a);
    }
    for v in [Verbosity::Short, Verbosity::Standard, Verbosity::Detailed] {
      assert_eq!(Verbosity::parse(v.as_str()).unwrap(), v);
    }
    assert!(Verbosity::parse("verbose").is_err());
  }

  #[test]
  fn staleness() {
    let cached = CachedExplanation {
      fact_hash:      "h1".into(),
      audience:       Audience::TradingViewer,
      verbosity:      Verbosity::Standard,
      tenant_id:      "t1".into(),
      module:         FactModule::TradingReadiness,
      entity_key:     "loan-1".into(),
      result:         ExplanationResult {
        summary:         "s".into(),
        explanation:     vec!["e".into()],
        recommendations: vec![],
        confidence:      Confidence::High,
        version:         1,
      },
      provider:       "template".into(),
      generated_at:   Utc::now(),
      correlation_id: None,
    };
    assert!(!LatestExplanation::new(Some(cached.clone()), Some("h1".into())).is_stale);
    assert!(LatestExplanation::new(Some(cached), Some("h2".into())).is_stale);
    assert!(!LatestExplanation::new(None, Some("h2".into())).is_stale);
  }
}
