//! Worker Pool Scheduler
//!
//! Fixed number of executor tasks draining one bounded queue. Each job runs
//! under the [`RetryPolicy`], every attempt bounded by the job timeout and
//! shielded from panics, so a bad job never takes an executor down.
//!
//! ```text
//! JobQueue::submit ──▶ mpsc(capacity) ──▶ worker 0..n ──▶ RetryPolicy
//!                                                           └─ attempt: timeout(catch_unwind(job.run()))
//! ```
//!
//! Shutdown: [`WorkerPool::stop`] cancels the pool token. Executors finish
//! the job in hand and exit; jobs still queued are dropped (the poll trigger
//! re-discovers their orders after restart).

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};
use uuid::Uuid;

use super::error::{JobError, PoolError};
use super::retry::RetryPolicy;
use crate::config::SyncConfig;
use crate::ledger::LedgerError;

/// Unit of background work. `run` may be called once per attempt.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), LedgerError>;
}

pub type BoxedJob = Arc<dyn Job>;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
}

impl PoolSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            job_timeout: config.job_timeout(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Job outcome counters
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    failed_attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    /// Jobs that eventually succeeded
    pub completed: u64,
    /// Jobs dropped after the retry policy gave up
    pub failed: u64,
    /// Individual failed attempts, panics and timeouts included
    pub failed_attempts: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable submit handle
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<BoxedJob>,
    cancel: CancellationToken,
}

impl JobQueue {
    /// Enqueue a job, waiting while the queue is full.
    pub async fn submit(&self, job: BoxedJob) -> Result<(), PoolError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PoolError::Stopped),
            sent = self.tx.send(job) => sent.map_err(|_| PoolError::Stopped),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct WorkerContext {
    job_timeout: Duration,
    retry: RetryPolicy,
    stats: Arc<PoolStats>,
}

pub struct WorkerPool {
    queue: JobQueue,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    span: Span,
}

impl WorkerPool {
    /// Spawn `settings.workers` executors on the current runtime
    pub fn start(settings: PoolSettings, span: Span) -> Self {
        let workers = settings.workers.max(1);
        let (tx, rx) = mpsc::channel::<BoxedJob>(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());
        let ctx = Arc::new(WorkerContext {
            job_timeout: settings.job_timeout,
            retry: settings.retry,
            stats: Arc::clone(&stats),
        });

        info!(parent: &span, worker_num = workers, "Starting workers");

        let handles = (0..workers)
            .map(|worker_id| {
                let worker_span = info_span!(parent: &span, "worker", worker_id);
                tokio::spawn(
                    worker_loop(Arc::clone(&rx), cancel.clone(), Arc::clone(&ctx))
                        .instrument(worker_span),
                )
            })
            .collect();

        Self {
            queue: JobQueue {
                tx,
                cancel: cancel.clone(),
            },
            cancel,
            workers: handles,
            stats,
            span,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub async fn submit(&self, job: BoxedJob) -> Result<(), PoolError> {
        self.queue.submit(job).await
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal executors to exit after their current job and wait for them
    pub async fn stop(self) {
        let span = self.span;
        info!(parent: &span, "Stopping worker pool");
        self.cancel.cancel();
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(parent: &span, error = %e, "Worker task ended abnormally");
            }
        }
        info!(parent: &span, "Worker pool stopped");
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<BoxedJob>>>,
    cancel: CancellationToken,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = job else {
            break;
        };
        run_job(job, &ctx).await;
    }
}

async fn run_job(job: BoxedJob, ctx: &WorkerContext) {
    let job_span = info_span!("job", job_id = %Uuid::new_v4(), job = job.name());
    async {
        info!("Running job");
        let result = ctx
            .retry
            .retry(|attempt| {
                let job = Arc::clone(&job);
                async move {
                    let result = run_attempt(job.as_ref(), ctx.job_timeout).await;
                    if let Err(e) = &result {
                        ctx.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                        error!(attempt, error = %e, "Job run failed");
                    }
                    result
                }
            })
            .await;

        match result {
            Ok(()) => {
                ctx.stats.completed.fetch_add(1, Ordering::Relaxed);
                info!("Job done");
            }
            Err(e) => {
                ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Job completely failed");
            }
        }
    }
    .instrument(job_span)
    .await
}

/// One attempt: bounded by `timeout`, panics converted to errors.
/// A timed-out attempt is dropped, which rolls back any open transaction.
pub async fn run_attempt(job: &dyn Job, timeout: Duration) -> Result<(), JobError> {
    let attempt = AssertUnwindSafe(job.run()).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Err(_) => Err(JobError::Timeout(timeout)),
        Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(result)) => result.map_err(JobError::from),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        fail_first: usize,
        panic: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> Result<(), LedgerError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.panic {
                    panic!("job exploded on run {n}");
                }
                return Err(LedgerError::LockContention("busy".into()));
            }
            Ok(())
        }
    }

    struct SlowJob;

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run(&self) -> Result<(), LedgerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn settings(workers: usize) -> PoolSettings {
        PoolSettings {
            workers,
            queue_capacity: 1,
            job_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_attempt_panic_becomes_error() {
        let job = CountingJob {
            runs: Arc::new(AtomicUsize::new(0)),
            fail_first: 1,
            panic: true,
        };
        let err = run_attempt(&job, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, JobError::Panicked(msg) if msg.contains("exploded")));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let err = run_attempt(&SlowJob, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_job_is_retried_and_worker_survives() {
        let pool = WorkerPool::start(settings(1), Span::none());
        let runs = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(CountingJob {
            runs: Arc::clone(&runs),
            fail_first: 2,
            panic: true,
        }))
        .await
        .unwrap();

        wait_for(|| pool.stats().completed == 1).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().failed_attempts, 2);

        // Same single worker still serves new jobs
        let more = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(CountingJob {
            runs: Arc::clone(&more),
            fail_first: 0,
            panic: false,
        }))
        .await
        .unwrap();
        wait_for(|| pool.stats().completed == 2).await;
        pool.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhausted_job_is_dropped() {
        let pool = WorkerPool::start(settings(2), Span::none());
        let runs = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(CountingJob {
            runs: Arc::clone(&runs),
            fail_first: usize::MAX,
            panic: false,
        }))
        .await
        .unwrap();

        wait_for(|| pool.stats().failed == 1).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().completed, 0);
        pool.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_after_stop_fails() {
        let pool = WorkerPool::start(settings(2), Span::none());
        let queue = pool.queue();
        pool.stop().await;

        assert!(queue.is_stopped());
        let job = Arc::new(CountingJob {
            runs: Arc::new(AtomicUsize::new(0)),
            fail_first: 0,
            panic: false,
        });
        assert_eq!(queue.submit(job).await, Err(PoolError::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_job() {
        struct Gate {
            finished: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Job for Gate {
            fn name(&self) -> &'static str {
                "gate"
            }

            async fn run(&self) -> Result<(), LedgerError> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let pool = WorkerPool::start(settings(1), Span::none());
        let finished = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(Gate {
            finished: Arc::clone(&finished),
        }))
        .await
        .unwrap();

        // Let the worker pick it up before stopping
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
