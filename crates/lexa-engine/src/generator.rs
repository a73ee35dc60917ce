//! A deterministic explanation generator that renders from the fact data
//! itself. Used when no remote model is configured, and in tests.

use lexa_core::{
  explain::{
    Audience, Confidence, ExplanationInput, ExplanationResult, Verbosity,
  },
  hash::canonical_json,
  producer::{ExplanationGenerator, GeneratorError},
};
use serde_json::Value;

/// Output schema version of [`TemplateGenerator`].
pub const TEMPLATE_VERSION: u32 = 1;

/// Fields that, when present, headline the summary in this order.
const HEADLINE_FIELDS: [&str; 5] = ["band", "status", "result", "score", "level"];

#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
  pub fn new() -> Self { Self }

  fn render(input: &ExplanationInput) -> ExplanationResult {
    let snapshot = &input.snapshot;
    let module = snapshot.module();
    let entity_key = snapshot.entity.entity_key();

    let fields: Vec<(&String, &Value)> = match &snapshot.data {
      Value::Object(map) => {
        let mut fields: Vec<_> = map.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
      }
      _ => Vec::new(),
    };

    let headline = HEADLINE_FIELDS
      .iter()
      .filter_map(|name| {
        fields
          .iter()
          .find(|(k, _)| k.as_str() == *name)
          .map(|(k, v)| format!("{k} {}", scalar(v)))
      })
      .collect::<Vec<_>>();

    let summary = if headline.is_empty() {
      format!("{} for {entity_key} has been computed.", module.label())
    } else {
      format!("{} for {entity_key}: {}.", module.label(), headline.join(", "))
    };

    let take = match input.verbosity {
      Verbosity::Short => 2,
      Verbosity::Standard => 5,
      Verbosity::Detailed => usize::MAX,
    };
    let mut explanation: Vec<String> = fields
      .iter()
      .take(take)
      .map(|(k, v)| format!("{k}: {}", scalar(v)))
      .collect();
    if explanation.is_empty() {
      explanation.push(format!("No structured data was recorded for {entity_key}."));
    }
    if input.audience == Audience::Compliance {
      explanation.push(format!("Evidence fact hash: {}.", snapshot.fact_hash));
    }

    let recommendations = recommend(&fields, input.audience);

    let confidence = match fields.len() {
      0 => Confidence::Low,
      1..=2 => Confidence::Medium,
      _ => Confidence::High,
    };

    ExplanationResult {
      summary,
      explanation,
      recommendations,
      confidence,
      version: TEMPLATE_VERSION,
    }
  }
}

fn scalar(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    other => canonical_json(other),
  }
}

fn recommend(fields: &[(&String, &Value)], audience: Audience) -> Vec<String> {
  let flagged = fields.iter().any(|(_, v)| {
    matches!(
      v.as_str(),
      Some("RED" | "AMBER" | "FAIL" | "BREACH" | "AT_RISK" | "HIGH")
    )
  });
  if !flagged {
    return Vec::new();
  }
  match audience {
    Audience::TradingAnalyst => vec![
      "Review the blocking inputs before marking the loan trade-ready.".to_owned(),
      "Re-run the recompute once missing evidence is uploaded.".to_owned(),
    ],
    Audience::Compliance => {
      vec!["Confirm the flagged items against source evidence.".to_owned()]
    }
    Audience::Investor | Audience::TradingViewer => {
      vec!["Contact the agent for an updated position.".to_owned()]
    }
  }
}

impl ExplanationGenerator for TemplateGenerator {
  fn name(&self) -> &str { "template" }

  async fn generate(
    &self,
    input: &ExplanationInput,
  ) -> Result<ExplanationResult, GeneratorError> {
    Ok(Self::render(input))
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use lexa_core::{entity::EntityKeys, fact::FactSnapshot};
  use serde_json::json;
  use uuid::Uuid;

  use super::*;

  fn input(data: Value, audience: Audience, verbosity: Verbosity) -> ExplanationInput {
    ExplanationInput {
      snapshot: FactSnapshot {
        snapshot_id: Uuid::new_v4(),
        tenant_id: "t1".into(),
        entity: EntityKeys::trading("loan-1"),
        data,
        computed_at: Utc::now(),
        computed_by: "test".into(),
        fact_version: 1,
        fact_hash: "abc".into(),
        correlation_id: None,
      },
      audience,
      verbosity,
    }
  }

  #[tokio::test]
  async fn renders_headline_and_is_deterministic() {
    let g = TemplateGenerator::new();
    let i = input(
      json!({ "score": 75, "band": "AMBER", "blockers": ["kyc"] }),
      Audience::TradingViewer,
      Verbosity::Standard,
    );
    let a = g.generate(&i).await.unwrap();
    let b = g.generate(&i).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.summary, "Trading readiness for loan-1: band AMBER, score 75.");
    assert_eq!(a.explanation[0], "band: AMBER");
    assert_eq!(a.explanation[1], r#"blockers: ["kyc"]"#);
    assert_eq!(a.confidence, Confidence::High);
    assert_eq!(a.recommendations.len(), 1);
  }

  #[tokio::test]
  async fn verbosity_and_audience_shape_output() {
    let g = TemplateGenerator::new();
    let data = json!({ "a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "f": 6 });
    let short = g.generate(&input(data.clone(), Audience::TradingViewer, Verbosity::Short)).await.unwrap();
    let full = g.generate(&input(data.clone(), Audience::TradingViewer, Verbosity::Detailed)).await.unwrap();
    assert_eq!(short.explanation.len(), 2);
    assert_eq!(full.explanation.len(), 6);
    assert!(full.recommendations.is_empty());

    let audit = g.generate(&input(data, Audience::Compliance, Verbosity::Short)).await.unwrap();
    assert_eq!(audit.explanation.last().unwrap(), "Evidence fact hash: abc.");
  }

  #[tokio::test]
  async fn empty_data_is_low_confidence() {
    let g = TemplateGenerator::new();
    let r = g.generate(&input(json!(null), Audience::Investor, Verbosity::Standard)).await.unwrap();
    assert_eq!(r.confidence, Confidence::Low);
    assert_eq!(r.explanation.len(), 1);
  }
}
