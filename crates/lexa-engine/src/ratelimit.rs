//! Fixed-window rate limiting of explanation generation.
//!
//! Scope is `(tenant, actor, module)`. Cache hits are never counted; only
//! calls that would reach the generator are. Scopes whose window has expired
//! are evicted whenever a new window starts.

use std::{
  collections::HashMap,
  sync::{Mutex, PoisonError},
  time::{Duration, Instant},
};

use lexa_core::entity::FactModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
  pub max_calls: u32,
  pub window:    Duration,
}

impl RateLimitPolicy {
  pub const fn per_minute(max_calls: u32) -> Self {
    Self { max_calls, window: Duration::from_secs(60) }
  }

  /// Default limits per module; aggregates are more expensive to explain.
  pub fn for_module(module: FactModule) -> Self {
    match module {
      FactModule::TradingReadiness => Self::per_minute(30),
      FactModule::EsgKpi => Self::per_minute(20),
      FactModule::Covenant => Self::per_minute(20),
      FactModule::PortfolioRisk => Self::per_minute(10),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
  Allowed { remaining: u32 },
  Denied { retry_after: Duration, limit: u32 },
}

#[derive(Debug)]
struct Window {
  started: Instant,
  count:   u32,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
  overrides: HashMap<FactModule, RateLimitPolicy>,
  windows:   Mutex<HashMap<(String, String, FactModule), Window>>,
}

impl RateLimiter {
  pub fn new() -> Self { Self::default() }

  pub fn with_policy(mut self, module: FactModule, policy: RateLimitPolicy) -> Self {
    self.overrides.insert(module, policy);
    self
  }

  pub fn policy(&self, module: FactModule) -> RateLimitPolicy {
    self
      .overrides
      .get(&module)
      .copied()
      .unwrap_or_else(|| RateLimitPolicy::for_module(module))
  }

  /// Count one call for the scope and decide whether it may proceed.
  pub fn check(&self, tenant_id: &str, actor: &str, module: FactModule) -> RateDecision {
    self.check_at(tenant_id, actor, module, Instant::now())
  }

  fn check_at(
    &self,
    tenant_id: &str,
    actor: &str,
    module: FactModule,
    now: Instant,
  ) -> RateDecision {
    let policy = self.policy(module);
    let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
    let key = (tenant_id.to_owned(), actor.to_owned(), module);
    let live = windows
      .get(&key)
      .is_some_and(|w| now.duration_since(w.started) < policy.window);
    if !live {
      // Starting a window: drop every scope whose window has run out,
      // this one included.
      windows.retain(|(_, _, m), w| now.duration_since(w.started) < self.policy(*m).window);
    }
    let window = windows.entry(key).or_insert(Window { started: now, count: 0 });

    if window.count >= policy.max_calls {
      let elapsed = now.duration_since(window.started);
      return RateDecision::Denied {
        retry_after: policy.window.saturating_sub(elapsed).max(Duration::from_secs(1)),
        limit:       policy.max_calls,
      };
    }

    window.count += 1;
    RateDecision::Allowed { remaining: policy.max_calls - window.count }
  }
}
