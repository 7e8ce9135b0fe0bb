//! Background accrual synchronisation
//!
//! - [`retry`]: Retry Policy and the [`Retryable`] classification trait
//! - [`pool`]: Worker Pool Scheduler
//! - [`job`]: Reconciliation Job
//! - [`poller`]: Poll Trigger
//! - [`service`]: [`AccrualSync`], the assembled service

pub mod error;
pub mod job;
pub mod poller;
pub mod pool;
pub mod retry;
pub mod service;

pub use error::{JobError, PoolError};
pub use job::{ReconcileOrder, ReconcileOutcome, reconcile_order};
pub use poller::PollTrigger;
pub use pool::{BoxedJob, Job, JobQueue, PoolSettings, PoolStatsSnapshot, WorkerPool};
pub use retry::{RetryPolicy, Retryable};
pub use service::AccrualSync;
