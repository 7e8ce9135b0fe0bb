//! Loyalty Engine - entry points for the transport layer
//!
//! The engine handles:
//! 1. Order submission (plus an immediate reconciliation for new orders)
//! 2. Withdrawal creation
//! 3. On-demand reconciliation of one order
//!
//! Background polling runs for the lifetime of the engine.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{Span, debug, info_span};

use crate::account::{AccountService, SubmitOutcome};
use crate::accrual::AccrualClient;
use crate::config::SyncConfig;
use crate::core_types::{OrderId, UserId};
use crate::ledger::{LedgerError, LedgerStore, Transaction};
use crate::sync::{AccrualSync, PoolError, PoolStatsSnapshot, ReconcileOrder, RetryPolicy};

pub struct LoyaltyEngine {
    accounts: AccountService,
    sync: AccrualSync,
    store: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualClient>,
    span: Span,
}

impl LoyaltyEngine {
    /// Start background reconciliation and wire the account service.
    /// Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn LedgerStore>,
        accrual: Arc<dyn AccrualClient>,
        config: &SyncConfig,
        span: Span,
    ) -> Self {
        let sync = AccrualSync::start(
            Arc::clone(&store),
            Arc::clone(&accrual),
            config,
            info_span!(parent: &span, "accrual_sync"),
        );
        let accounts = AccountService::new(
            Arc::clone(&store),
            RetryPolicy::from_config(config),
            info_span!(parent: &span, "accounts"),
        );
        Self {
            accounts,
            sync,
            store,
            accrual,
            span,
        }
    }

    /// Read models and user management
    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    /// Accept an order number for `user_id`.
    ///
    /// A newly accepted order is queued for reconciliation in the
    /// background; the caller does not wait for queue space.
    pub async fn submit_order(
        &self,
        user_id: UserId,
        number: &str,
    ) -> Result<SubmitOutcome, LedgerError> {
        let outcome = self.accounts.submit_order(user_id, number).await?;
        if let SubmitOutcome::Accepted(order) = &outcome {
            self.spawn_reconciliation(order.id);
        }
        Ok(outcome)
    }

    pub async fn create_withdrawal(
        &self,
        user_id: UserId,
        number: &str,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        self.accounts
            .create_withdrawal(user_id, number, amount)
            .await
    }

    /// Queue a reconciliation of `order_id`, waiting for queue space
    pub async fn enqueue_reconciliation(&self, order_id: OrderId) -> Result<(), PoolError> {
        self.sync.enqueue_reconciliation(order_id).await
    }

    fn spawn_reconciliation(&self, order_id: OrderId) {
        let queue = self.sync.queue();
        let job = ReconcileOrder::new(order_id, Arc::clone(&self.store), Arc::clone(&self.accrual));
        let span = self.span.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.submit(Arc::new(job)).await {
                debug!(parent: &span, %order_id, error = %e, "Immediate reconciliation not queued");
            }
        });
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.sync.stats()
    }

    /// Stop polling, drain in-flight jobs, release executors
    pub async fn shutdown(self) {
        self.sync.stop().await;
    }
}
