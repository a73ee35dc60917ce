//! Daily refresh schedule: once a day at a fixed UTC hour, queue a
//! scheduled refresh for every configured tenant.

use chrono::{DateTime, Days, Utc};
use lexa_core::{
  audit::Actor,
  producer::{ExplanationGenerator, Upstream},
  store::LedgerStore,
};
use lexa_engine::{FactService, job::RefreshReason};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The first instant strictly after `now` at `hour`:00:00 UTC, or `None`
/// when `hour` is not a valid hour of the day.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> Option<DateTime<Utc>> {
  let today = now.date_naive().and_hms_opt(hour, 0, 0)?.and_utc();
  if today > now { Some(today) } else { today.checked_add_days(Days::new(1)) }
}

/// Run until `shutdown` flips or its sender is dropped.
pub async fn run<S, U, G>(
  service: FactService<S, U, G>,
  tenants: Vec<String>,
  hour: u32,
  mut shutdown: watch::Receiver<bool>,
) where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  if tenants.is_empty() {
    info!("no refresh tenants configured; nightly refresh disabled");
    return;
  }

  loop {
    let now = Utc::now();
    let Some(next) = next_run_after(now, hour) else {
      error!(hour, "invalid nightly refresh hour");
      return;
    };
    info!(next_run = %next, tenants = tenants.len(), "nightly refresh scheduled");

    let wait = (next - now).to_std().unwrap_or_default();
    tokio::select! {
      _ = shutdown.changed() => break,
      _ = tokio::time::sleep(wait) => {}
    }

    enqueue_all(&service, &tenants, next);
  }
  info!("nightly scheduler stopped");
}

/// Queue one scheduled refresh per tenant. Returns how many were queued.
pub fn enqueue_all<S, U, G>(
  service: &FactService<S, U, G>,
  tenants: &[String],
  run_at: DateTime<Utc>,
) -> usize
where
  S: LedgerStore + 'static,
  U: Upstream + 'static,
  G: ExplanationGenerator + 'static,
{
  let actor = Actor::worker();
  let mut queued = 0;
  for tenant in tenants {
    let correlation_id = format!("nightly-{}-{tenant}", run_at.format("%Y-%m-%d"));
    match service.request_refresh(
      tenant,
      RefreshReason::ScheduledNightly,
      &actor,
      Some(&correlation_id),
    ) {
      Ok(job_id) => {
        info!(%job_id, tenant, "nightly refresh queued");
        queued += 1;
      }
      Err(e) => warn!(tenant, error = %e, "failed to queue nightly refresh"),
    }
  }
  queued
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
  }

  #[test]
  fn runs_later_today_when_the_hour_is_ahead() {
    assert_eq!(next_run_after(at(1, 30), 2), Some(at(2, 0)));
  }

  #[test]
  fn runs_tomorrow_when_the_hour_has_passed() {
    let next = next_run_after(at(2, 0), 2).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap());
    let next = next_run_after(at(23, 59), 2).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 2, 0, 0).unwrap());
  }

  #[test]
  fn rejects_invalid_hours() {
    assert_eq!(next_run_after(at(0, 0), 24), None);
  }
}
