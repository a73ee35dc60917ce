//! Fact domains and the composite keys that identify an entity within one.
//!
//! Every fact belongs to exactly one [`FactModule`]. The entity it describes is
//! identified by an [`EntityKeys`] variant whose shape is fixed per module, so
//! a covenant fact can never be addressed without its covenant id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Entity key used for the tenant-wide portfolio when no portfolio id is set.
pub const DEFAULT_PORTFOLIO: &str = "default";

// ─── FactModule ──────────────────────────────────────────────────────────────

/// The fact domains known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactModule {
  TradingReadiness,
  EsgKpi,
  Covenant,
  PortfolioRisk,
}

impl FactModule {
  pub const ALL: [FactModule; 4] = [
    Self::TradingReadiness,
    Self::EsgKpi,
    Self::Covenant,
    Self::PortfolioRisk,
  ];

  /// Stable discriminant; matches the serde representation.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::TradingReadiness => "trading_readiness",
      Self::EsgKpi => "esg_kpi",
      Self::Covenant => "covenant",
      Self::PortfolioRisk => "portfolio_risk",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|m| m.as_str() == s)
      .ok_or_else(|| Error::UnknownModule(s.to_owned()))
  }

  /// Human-readable label used in audit summaries.
  pub fn label(self) -> &'static str {
    match self {
      Self::TradingReadiness => "Trading readiness",
      Self::EsgKpi => "ESG KPI",
      Self::Covenant => "Covenant",
      Self::PortfolioRisk => "Portfolio risk",
    }
  }
}

impl fmt::Display for FactModule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── EntityKeys ──────────────────────────────────────────────────────────────

/// The domain-specific composite key of a fact's subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum EntityKeys {
  TradingReadiness {
    loan_id: String,
  },
  EsgKpi {
    loan_id: String,
    kpi_id:  String,
  },
  Covenant {
    loan_id:     String,
    covenant_id: String,
  },
  PortfolioRisk {
    /// `None` addresses the tenant-wide portfolio.
    #[serde(default)]
    portfolio_id: Option<String>,
  },
}

impl EntityKeys {
  pub fn trading(loan_id: impl Into<String>) -> Self {
    Self::TradingReadiness { loan_id: loan_id.into() }
  }

  pub fn esg_kpi(loan_id: impl Into<String>, kpi_id: impl Into<String>) -> Self {
    Self::EsgKpi { loan_id: loan_id.into(), kpi_id: kpi_id.into() }
  }

  pub fn covenant(
    loan_id: impl Into<String>,
    covenant_id: impl Into<String>,
  ) -> Self {
    Self::Covenant {
      loan_id:     loan_id.into(),
      covenant_id: covenant_id.into(),
    }
  }

  /// `Some("default")` is folded into `None`; both name the tenant-wide
  /// portfolio.
  pub fn portfolio(portfolio_id: Option<String>) -> Self {
    Self::PortfolioRisk {
      portfolio_id: portfolio_id.filter(|p| p != DEFAULT_PORTFOLIO),
    }
  }

  /// Build keys from loosely-typed request parts, rejecting any combination
  /// that does not fit `module`.
  pub fn from_parts(
    module: FactModule,
    loan_id: Option<String>,
    kpi_id: Option<String>,
    covenant_id: Option<String>,
    portfolio_id: Option<String>,
  ) -> Result<Self> {
    let need = |v: Option<String>, name: &str| {
      v.ok_or_else(|| Error::InvalidEntity(format!("{module} requires {name}")))
    };
    let keys = match module {
      FactModule::TradingReadiness => {
        Self::TradingReadiness { loan_id: need(loan_id, "loan_id")? }
      }
      FactModule::EsgKpi => Self::EsgKpi {
        loan_id: need(loan_id, "loan_id")?,
        kpi_id:  need(kpi_id, "kpi_id")?,
      },
      FactModule::Covenant => Self::Covenant {
        loan_id:     need(loan_id, "loan_id")?,
        covenant_id: need(covenant_id, "covenant_id")?,
      },
      FactModule::PortfolioRisk => Self::portfolio(portfolio_id),
    };
    keys.validate()?;
    Ok(keys)
  }

  pub fn module(&self) -> FactModule {
    match self {
      Self::TradingReadiness { .. } => FactModule::TradingReadiness,
      Self::EsgKpi { .. } => FactModule::EsgKpi,
      Self::Covenant { .. } => FactModule::Covenant,
      Self::PortfolioRisk { .. } => FactModule::PortfolioRisk,
    }
  }

  /// The loan this entity hangs off, if any.
  pub fn loan_id(&self) -> Option<&str> {
    match self {
      Self::TradingReadiness { loan_id }
      | Self::EsgKpi { loan_id, .. }
      | Self::Covenant { loan_id, .. } => Some(loan_id.as_str()),
      Self::PortfolioRisk { .. } => None,
    }
  }

  /// Storage key, unique within a module: `loan-1`, `loan-1/kpi-2`,
  /// `default`.
  pub fn entity_key(&self) -> String {
    match self {
      Self::TradingReadiness { loan_id } => loan_id.clone(),
      Self::EsgKpi { loan_id, kpi_id } => format!("{loan_id}/{kpi_id}"),
      Self::Covenant { loan_id, covenant_id } => {
        format!("{loan_id}/{covenant_id}")
      }
      Self::PortfolioRisk { portfolio_id } => portfolio_id
        .clone()
        .unwrap_or_else(|| DEFAULT_PORTFOLIO.to_owned()),
    }
  }

  /// The `evidenceRef` written on audit records about this entity.
  pub fn evidence_ref(&self) -> String {
    match self.loan_id() {
      Some(loan_id) => loan_id.to_owned(),
      None => self.entity_key(),
    }
  }

  /// Reject empty identifiers and identifiers that would make
  /// [`entity_key`](Self::entity_key) ambiguous. An explicit
  /// `portfolio_id` of `"default"` is rejected: it would share the storage
  /// key of `portfolio(None)` but hash differently.
  pub fn validate(&self) -> Result<()> {
    if let Self::PortfolioRisk { portfolio_id: Some(p) } = self {
      if p == DEFAULT_PORTFOLIO {
        return Err(Error::InvalidEntity(format!(
          "portfolio_id {DEFAULT_PORTFOLIO:?} names the tenant-wide portfolio; omit it"
        )));
      }
    }

    let ids: Vec<(&str, &str)> = match self {
      Self::TradingReadiness { loan_id } => vec![("loan_id", loan_id.as_str())],
      Self::EsgKpi { loan_id, kpi_id } => {
        vec![("loan_id", loan_id.as_str()), ("kpi_id", kpi_id.as_str())]
      }
      Self::Covenant { loan_id, covenant_id } => {
        vec![("loan_id", loan_id.as_str()), ("covenant_id", covenant_id.as_str())]
      }
      Self::PortfolioRisk { portfolio_id } => portfolio_id
        .as_deref()
        .map(|p| vec![("portfolio_id", p)])
        .unwrap_or_default(),
    };
    for (name, value) in ids {
      if value.trim().is_empty() {
        return Err(Error::InvalidEntity(format!("{name} is empty")));
      }
      if value.contains('/') {
        return Err(Error::InvalidEntity(format!(
          "{name} must not contain '/': {value:?}"
        )));
      }
    }
    Ok(())
  }
}

impl fmt::Display for EntityKeys {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.module(), self.entity_key())
  }
}
