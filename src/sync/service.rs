//! AccrualSync: worker pool plus poll trigger, started and stopped together

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, info_span};

use super::error::PoolError;
use super::job::ReconcileOrder;
use super::pool::{JobQueue, PoolSettings, PoolStatsSnapshot, WorkerPool};
use super::poller::PollTrigger;
use crate::accrual::AccrualClient;
use crate::config::SyncConfig;
use crate::core_types::OrderId;
use crate::ledger::LedgerStore;

pub struct AccrualSync {
    pool: WorkerPool,
    poll_cancel: CancellationToken,
    poller: JoinHandle<()>,
    store: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualClient>,
    span: Span,
}

impl AccrualSync {
    /// Start the pool and the poll trigger on the current runtime
    pub fn start(
        store: Arc<dyn LedgerStore>,
        accrual: Arc<dyn AccrualClient>,
        config: &SyncConfig,
        span: Span,
    ) -> Self {
        let pool = WorkerPool::start(
            PoolSettings::from_config(config),
            info_span!(parent: &span, "worker_pool"),
        );

        let poll_cancel = CancellationToken::new();
        let poller = PollTrigger::new(
            Arc::clone(&store),
            Arc::clone(&accrual),
            pool.queue(),
            config.poll_interval(),
            info_span!(parent: &span, "poll_trigger"),
        )
        .spawn(poll_cancel.clone());

        info!(
            parent: &span,
            workers = pool.worker_count(),
            poll_interval_ms = config.poll_interval_ms,
            "AccrualSync started"
        );

        Self {
            pool,
            poll_cancel,
            poller,
            store,
            accrual,
            span,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.pool.queue()
    }

    /// Queue an immediate reconciliation of one order
    pub async fn enqueue_reconciliation(&self, order_id: OrderId) -> Result<(), PoolError> {
        let job = ReconcileOrder::new(order_id, Arc::clone(&self.store), Arc::clone(&self.accrual));
        self.pool.submit(Arc::new(job)).await
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.pool.stats()
    }

    /// Stop polling first, then let in-flight jobs finish and stop the pool
    pub async fn stop(self) {
        let span = self.span;
        info!(parent: &span, "Service shutdown");
        self.poll_cancel.cancel();
        if let Err(e) = self.poller.await {
            error!(parent: &span, error = %e, "Poll trigger ended abnormally");
        }
        self.pool.stop().await;
    }
}
