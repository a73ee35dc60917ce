//! Engine-facing configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Worker tasks draining the job queue.
  pub workers:           usize,
  /// Job re-delivery policy; also used around producer calls.
  pub retry:             RetryPolicy,
  /// How long an explain waits for the recompute it triggered.
  pub explain_wait:      Duration,
  /// How long `POST /facts/recompute` waits before answering 202.
  pub recompute_wait:    Duration,
  pub producer_timeout:  Duration,
  pub generator_timeout: Duration,
  /// Enqueue an explanation job when a user recompute detects drift.
  pub explain_on_drift:  bool,
  /// Per-category cap on entities touched by one nightly refresh.
  pub refresh_top_n:     usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      workers:           4,
      retry:             RetryPolicy::default(),
      explain_wait:      Duration::from_secs(10),
      recompute_wait:    Duration::from_secs(10),
      producer_timeout:  Duration::from_secs(15),
      generator_timeout: Duration::from_secs(30),
      explain_on_drift:  true,
      refresh_top_n:     20,
    }
  }
}
