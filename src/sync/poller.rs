//! Poll Trigger
//!
//! Every interval: read the ids of unsettled orders at READ COMMITTED and
//! submit one reconciliation job per id. No dedup against jobs in flight;
//! the order-row lock makes a duplicate job a no-op.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info};

use super::error::PoolError;
use super::job::ReconcileOrder;
use super::pool::JobQueue;
use crate::accrual::AccrualClient;
use crate::ledger::{IsolationLevel, LedgerError, LedgerStore};

pub struct PollTrigger {
    store: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualClient>,
    queue: JobQueue,
    interval: Duration,
    span: Span,
}

impl PollTrigger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        accrual: Arc<dyn AccrualClient>,
        queue: JobQueue,
        interval: Duration,
        span: Span,
    ) -> Self {
        Self {
            store,
            accrual,
            queue,
            interval,
            span,
        }
    }

    /// One scan. Returns how many jobs were submitted.
    pub async fn poll_once(&self) -> Result<usize, LedgerError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let ids = tx.unsettled_order_ids().await?;
        tx.rollback().await?;

        debug!(parent: &self.span, unsettled = ids.len(), "Unsettled orders found");

        let mut submitted = 0;
        for id in ids {
            let job = ReconcileOrder::new(id, Arc::clone(&self.store), Arc::clone(&self.accrual));
            match self.queue.submit(Arc::new(job)).await {
                Ok(()) => submitted += 1,
                Err(PoolError::Stopped) => break,
            }
        }
        Ok(submitted)
    }

    /// Run until `cancel` fires. The first scan happens one interval after
    /// start. Cancellation also interrupts a scan blocked on a full queue.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let span = self.span.clone();
        tokio::spawn(
            async move {
                let mut ticker =
                    tokio::time::interval_at(Instant::now() + self.interval, self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    info!("Fetching statuses");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = self.poll_once() => match result {
                            Ok(submitted) => debug!(submitted, "Poll cycle done"),
                            Err(e) => error!(error = %e, "Poll cycle failed"),
                        },
                    }
                }
                info!("Poll trigger stopped");
            }
            .instrument(span),
        )
    }
}
