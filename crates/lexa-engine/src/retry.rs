//! Exponential backoff for producer calls, blob fetches and job
//! re-delivery.

use std::{fmt::Display, future::Future, time::Duration};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts including the first one.
  pub max_attempts:  u32,
  pub initial_delay: Duration,
  pub max_delay:     Duration,
  pub multiplier:    f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:  3,
      initial_delay: Duration::from_millis(200),
      max_delay:     Duration::from_secs(5),
      multiplier:    2.0,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
    Self { max_attempts, initial_delay, max_delay, ..Default::default() }
  }

  /// Delay before retrying after failed attempt number `attempt` (1-based).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
    if secs >= self.max_delay.as_secs_f64() {
      return self.max_delay;
    }
    Duration::from_secs_f64(secs.max(0.0))
  }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached.
pub async fn retry_with_backoff<T, E, F, Fut>(
  policy: &RetryPolicy,
  what: &str,
  is_retryable: impl Fn(&E) -> bool,
  mut op: F,
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  let mut attempt = 1;
  loop {
    match op().await {
      Ok(v) => return Ok(v),
      Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
        let delay = policy.delay_for_attempt(attempt);
        warn!(
          what,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}
