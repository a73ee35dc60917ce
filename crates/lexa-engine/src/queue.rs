//! In-process job queue and worker pool.
//!
//! Delivery is at-least-once: a job whose handler fails with a retryable
//! error is re-enqueued after an exponential backoff delay, or after the
//! error's `retry_after` when that is longer, until `max_attempts` is
//! reached. Workers share one receiver and hold no other
//! state, so jobs run independently and in no particular global order.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
  sync::{Mutex, mpsc, oneshot, watch},
  task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
  EngineError, Result,
  job::{Job, JobOutput},
  retry::RetryPolicy,
};

/// Executes one delivery of a job.
pub trait JobHandler: Send + Sync + 'static {
  fn handle<'a>(
    &'a self,
    job: &'a Job,
  ) -> impl Future<Output = Result<JobOutput>> + Send + 'a;
}

type Reply = oneshot::Sender<Result<JobOutput>>;

struct Envelope {
  id:      Uuid,
  job:     Job,
  attempt: u32,
  reply:   Option<Reply>,
}

// ─── Queue ───────────────────────────────────────────────────────────────────

/// Producer side of the queue. Cloning is cheap.
#[derive(Clone)]
pub struct JobQueue {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl JobQueue {
  /// Enqueue `job` and get a handle that resolves with its final outcome.
  pub fn enqueue(&self, job: Job) -> Result<JobHandle> {
    let (reply, rx) = oneshot::channel();
    let id = self.send(job, Some(reply))?;
    Ok(JobHandle { id, rx })
  }

  /// Enqueue `job` without waiting for it.
  pub fn submit(&self, job: Job) -> Result<Uuid> {
    self.send(job, None)
  }

  fn send(&self, job: Job, reply: Option<Reply>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    info!(job_id = %id, job = job.name(), tenant = job.tenant_id(), "job enqueued");
    self
      .tx
      .send(Envelope { id, job, attempt: 1, reply })
      .map_err(|_| EngineError::QueueClosed)?;
    Ok(id)
  }
}

/// Completion signal of one enqueued job.
pub struct JobHandle {
  id: Uuid,
  rx: oneshot::Receiver<Result<JobOutput>>,
}

impl JobHandle {
  pub fn id(&self) -> Uuid { self.id }

  /// Wait up to `timeout` for the job's final outcome. On timeout the job
  /// keeps running and the handle may be waited on again.
  pub async fn wait(&mut self, timeout: Duration) -> Result<JobOutput> {
    match tokio::time::timeout(timeout, &mut self.rx).await {
      Err(_) => Err(EngineError::Timeout(timeout)),
      Ok(Err(_)) => Err(EngineError::QueueClosed),
      Ok(Ok(outcome)) => outcome,
    }
  }
}

// ─── Workers ─────────────────────────────────────────────────────────────────

/// A fixed-size pool of tokio tasks draining one [`JobQueue`].
pub struct WorkerPool {
  shutdown: watch::Sender<bool>,
  workers:  Vec<JoinHandle<()>>,
}

impl WorkerPool {
  /// Spawn `workers` tasks running `handler` and return the queue feeding
  /// them.
  pub fn start<H: JobHandler>(
    handler: Arc<H>,
    workers: usize,
    retry: RetryPolicy,
  ) -> (JobQueue, WorkerPool) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rx = Arc::new(Mutex::new(rx));
    let (shutdown, shutdown_rx) = watch::channel(false);

    let workers = (0..workers.max(1))
      .map(|n| {
        tokio::spawn(run_worker(
          n,
          Arc::clone(&handler),
          Arc::clone(&rx),
          tx.clone(),
          retry,
          shutdown_rx.clone(),
        ))
      })
      .collect();

    (JobQueue { tx }, WorkerPool { shutdown, workers })
  }

  /// Stop taking new jobs and wait for in-flight ones to finish. Jobs still
  /// queued are dropped; their handles resolve with `QueueClosed`.
  pub async fn shutdown(self) {
    let _ = self.shutdown.send(true);
    for worker in self.workers {
      if let Err(e) = worker.await {
        error!("worker task panicked: {e}");
      }
    }
    info!("worker pool stopped");
  }
}

async fn run_worker<H: JobHandler>(
  n: usize,
  handler: Arc<H>,
  rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
  tx: mpsc::UnboundedSender<Envelope>,
  retry: RetryPolicy,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    let next = tokio::select! {
      _ = shutdown.changed() => break,
      next = async { rx.lock().await.recv().await } => next,
    };
    let Some(envelope) = next else { break };
    deliver(n, handler.as_ref(), envelope, &tx, &retry).await;
  }
}

async fn deliver<H: JobHandler>(
  worker: usize,
  handler: &H,
  envelope: Envelope,
  tx: &mpsc::UnboundedSender<Envelope>,
  retry: &RetryPolicy,
) {
  let Envelope { id, job, attempt, reply } = envelope;
  let outcome = handler.handle(&job).await;

  match outcome {
    Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
      // Never redeliver before a rate limit's window reopens.
      let backoff = retry.delay_for_attempt(attempt);
      let delay = e.retry_after().map_or(backoff, |after| after.max(backoff));
      warn!(
        worker,
        job_id = %id,
        job = job.name(),
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %e,
        "job failed; re-delivering"
      );
      let tx = tx.clone();
      tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // A closed queue drops the envelope, which resolves any handle.
        let _ = tx.send(Envelope { id, job, attempt: attempt + 1, reply });
      });
    }
    outcome => {
      match &outcome {
        Ok(_) => info!(worker, job_id = %id, job = job.name(), attempt, "job completed"),
        Err(e) => error!(
          worker,
          job_id = %id,
          job = job.name(),
          attempt,
          error = %e,
          "job failed"
        ),
      }
      if let Some(reply) = reply {
        let _ = reply.send(outcome);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use lexa_core::audit::Actor;

  use super::*;
  use crate::job::{NightlyRefreshJob, RefreshReason, RefreshStats};

  /// Fails with a transient error until the given attempt.
  struct Flaky {
    calls:        AtomicU32,
    succeed_from: u32,
    retryable:    bool,
  }

  impl JobHandler for Flaky {
    async fn handle(&self, _job: &Job) -> Result<JobOutput> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n >= self.succeed_from {
        Ok(JobOutput::Refreshed(RefreshStats::default()))
      } else if self.retryable {
        Err(EngineError::Transient(format!("attempt {n}")))
      } else {
        Err(EngineError::Validation("bad".into()))
      }
    }
  }

  fn job() -> Job {
    Job::NightlyRefresh(NightlyRefreshJob {
      tenant_id:      "t1".into(),
      reason:         RefreshReason::Manual,
      actor:          Actor::worker(),
      correlation_id: None,
    })
  }

  fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
  }

  #[tokio::test]
  async fn retryable_failures_are_redelivered() {
    let handler = Arc::new(Flaky { calls: AtomicU32::new(0), succeed_from: 3, retryable: true });
    let (queue, pool) = WorkerPool::start(Arc::clone(&handler), 2, fast_retry(5));

    let mut handle = queue.enqueue(job()).unwrap();
    let out = handle.wait(Duration::from_secs(5)).await.unwrap();
    assert!(matches!(out, JobOutput::Refreshed(_)));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn non_retryable_failures_are_not_redelivered() {
    let handler = Arc::new(Flaky { calls: AtomicU32::new(0), succeed_from: 10, retryable: false });
    let (queue, pool) = WorkerPool::start(Arc::clone(&handler), 1, fast_retry(5));

    let mut handle = queue.enqueue(job()).unwrap();
    let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn attempts_are_bounded() {
    let handler = Arc::new(Flaky { calls: AtomicU32::new(0), succeed_from: 10, retryable: true });
    let (queue, pool) = WorkerPool::start(Arc::clone(&handler), 1, fast_retry(3));

    let mut handle = queue.enqueue(job()).unwrap();
    let err = handle.wait(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, EngineError::Transient(_)));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn rate_limited_jobs_wait_for_retry_after() {
    struct Limited {
      calls: AtomicU32,
    }
    impl JobHandler for Limited {
      async fn handle(&self, _job: &Job) -> Result<JobOutput> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
          return Err(EngineError::RateLimited { retry_after: Duration::from_millis(150) });
        }
        Ok(JobOutput::Refreshed(RefreshStats::default()))
      }
    }
    let handler = Arc::new(Limited { calls: AtomicU32::new(0) });
    let (queue, pool) = WorkerPool::start(Arc::clone(&handler), 1, fast_retry(2));

    let started = tokio::time::Instant::now();
    let mut handle = queue.enqueue(job()).unwrap();
    assert!(handle.wait(Duration::from_secs(5)).await.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn wait_times_out_and_can_resume() {
    struct Slow;
    impl JobHandler for Slow {
      async fn handle(&self, _job: &Job) -> Result<JobOutput> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(JobOutput::Refreshed(RefreshStats::default()))
      }
    }
    let (queue, pool) = WorkerPool::start(Arc::new(Slow), 1, fast_retry(1));
    let mut handle = queue.enqueue(job()).unwrap();
    let err = handle.wait(Duration::from_millis(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(handle.wait(Duration::from_secs(5)).await.is_ok());
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn submit_after_shutdown_fails() {
    let handler = Flaky { calls: AtomicU32::new(0), succeed_from: 1, retryable: true };
    let (queue, pool) = WorkerPool::start(Arc::new(handler), 1, fast_retry(1));
    pool.shutdown().await;
    // The receiver is gone once every worker has exited.
    assert!(matches!(queue.submit(job()), Err(EngineError::QueueClosed)));
  }
}
