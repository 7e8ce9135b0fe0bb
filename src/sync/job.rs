//! Reconciliation Job
//!
//! Pulls the provider's view of one order and applies it to the ledger:
//!
//! 1. serializable transaction, exclusive lock on the order row
//! 2. terminal or missing order: nothing to do
//! 3. ask the provider (any failure drops the transaction, i.e. rollback)
//! 4. write status and accrual onto the order
//! 5. on the transition into PROCESSED with an accrual: lock the owner,
//!    append a REPLENISHMENT entry and credit the balance
//! 6. commit
//!
//! Step 5 fires once per transition, not once per run. A second job for the
//! same order blocks on the row lock, then sees the terminal status.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::pool::Job;
use crate::accrual::AccrualClient;
use crate::core_types::OrderId;
use crate::ledger::{
    IsolationLevel, LedgerError, LedgerStore, OrderStatus, Transaction, TransactionKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Order row does not exist
    Missing,
    /// Already terminal when locked; provider not called
    AlreadySettled(OrderStatus),
    /// Provider does not know the number yet
    NotYetKnown,
    /// Provider reports the status the order already has
    Unchanged(OrderStatus),
    /// Status advanced without a ledger effect
    Updated { from: OrderStatus, to: OrderStatus },
    /// Transition into PROCESSED, owner credited
    Settled { amount: Decimal },
}

/// Run the reconciliation protocol once for `order_id`
pub async fn reconcile_order(
    store: &dyn LedgerStore,
    accrual: &dyn AccrualClient,
    order_id: OrderId,
) -> Result<ReconcileOutcome, LedgerError> {
    let mut tx = store.begin(IsolationLevel::Serializable).await?;

    let Some(order) = tx.lock_order(order_id).await? else {
        tx.rollback().await?;
        return Ok(ReconcileOutcome::Missing);
    };
    if order.status.is_terminal() {
        tx.rollback().await?;
        return Ok(ReconcileOutcome::AlreadySettled(order.status));
    }

    let Some(remote) = accrual.get_order(&order.external_id).await? else {
        tx.rollback().await?;
        return Ok(ReconcileOutcome::NotYetKnown);
    };

    let new_status = remote.status;
    let amount = remote.accrual.filter(|_| new_status == OrderStatus::Processed);
    tx.update_order(order.id, new_status, amount).await?;

    let outcome = match amount {
        Some(amount) if order.status != new_status && new_status == OrderStatus::Processed => {
            tx.lock_user_balance(order.user_id).await?;
            tx.append_entry(&Transaction::new(
                TransactionKind::Replenishment,
                order.user_id,
                order.id,
                &order.external_id,
                amount,
            ))
            .await?;
            ReconcileOutcome::Settled { amount }
        }
        _ if order.status != new_status => ReconcileOutcome::Updated {
            from: order.status,
            to: new_status,
        },
        _ => ReconcileOutcome::Unchanged(new_status),
    };

    tx.commit().await?;
    Ok(outcome)
}

/// [`Job`] wrapper around [`reconcile_order`]
pub struct ReconcileOrder {
    order_id: OrderId,
    store: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualClient>,
}

impl ReconcileOrder {
    pub fn new(
        order_id: OrderId,
        store: Arc<dyn LedgerStore>,
        accrual: Arc<dyn AccrualClient>,
    ) -> Self {
        Self {
            order_id,
            store,
            accrual,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }
}

#[async_trait]
impl Job for ReconcileOrder {
    fn name(&self) -> &'static str {
        "reconcile_order"
    }

    async fn run(&self) -> Result<(), LedgerError> {
        let outcome =
            reconcile_order(self.store.as_ref(), self.accrual.as_ref(), self.order_id).await?;
        debug!(order_id = %self.order_id, ?outcome, "Order reconciled");
        Ok(())
    }
}

#[cfg(all(test, feature = "mock-accrual"))]
mod tests {
    use super::*;
    use crate::accrual::{AccrualOrder, RemoteError, ScriptedAccrualClient};
    use crate::ledger::{MemoryLedgerStore, Order};

    const NUMBER: &str = "79927398713";

    async fn setup() -> (MemoryLedgerStore, ScriptedAccrualClient, Order) {
        let store = MemoryLedgerStore::new();
        let user = store.create_user("alice").await.unwrap();
        let order = Order::registered(NUMBER, user.id);
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();
        (store, ScriptedAccrualClient::new(), order)
    }

    async fn balance(store: &MemoryLedgerStore, order: &Order) -> Decimal {
        store.user(order.user_id).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_processed_credits_once() {
        let (store, client, order) = setup().await;
        client.processed(NUMBER, Decimal::new(500, 0));

        let outcome = reconcile_order(&store, &client, order.id).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Settled {
                amount: Decimal::new(500, 0)
            }
        );
        assert_eq!(balance(&store, &order).await, Decimal::new(500, 0));

        let outcome = reconcile_order(&store, &client, order.id).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::AlreadySettled(OrderStatus::Processed)
        );
        assert_eq!(balance(&store, &order).await, Decimal::new(500, 0));
        assert_eq!(client.calls(NUMBER), 1);
    }

    #[tokio::test]
    async fn test_invalid_is_terminal_without_ledger_effect() {
        let (store, client, order) = setup().await;
        client.status(NUMBER, OrderStatus::Invalid);

        let outcome = reconcile_order(&store, &client, order.id).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                from: OrderStatus::Registered,
                to: OrderStatus::Invalid
            }
        );
        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Invalid);
        assert_eq!(balance(&store, &order).await, Decimal::ZERO);
        assert!(
            store
                .entries_by_user(order.user_id, TransactionKind::Replenishment)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_processing_then_processed() {
        let (store, client, order) = setup().await;
        client.script(
            NUMBER,
            [
                Ok(Some(AccrualOrder::new(NUMBER, OrderStatus::Processing, None))),
                Ok(Some(AccrualOrder::new(NUMBER, OrderStatus::Processing, None))),
                Ok(Some(AccrualOrder::processed(NUMBER, Decimal::new(72998, 2)))),
            ],
        );

        let first = reconcile_order(&store, &client, order.id).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Updated { .. }));
        let second = reconcile_order(&store, &client, order.id).await.unwrap();
        assert_eq!(second, ReconcileOutcome::Unchanged(OrderStatus::Processing));
        let third = reconcile_order(&store, &client, order.id).await.unwrap();
        assert!(matches!(third, ReconcileOutcome::Settled { .. }));

        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.accrual, Some(Decimal::new(72998, 2)));
    }

    #[tokio::test]
    async fn test_processed_without_accrual_settles_status_only() {
        let (store, client, order) = setup().await;
        client.status(NUMBER, OrderStatus::Processed);

        let outcome = reconcile_order(&store, &client, order.id).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
        assert_eq!(balance(&store, &order).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_remote_error_rolls_back() {
        let (store, client, order) = setup().await;
        client.script(NUMBER, [Err(RemoteError::Transport("refused".into()))]);

        let err = reconcile_order(&store, &client, order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Remote(_)));

        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Registered);

        // Row lock was released with the dropped transaction
        client.processed(NUMBER, Decimal::ONE);
        assert!(matches!(
            reconcile_order(&store, &client, order.id).await.unwrap(),
            ReconcileOutcome::Settled { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_number_is_noop() {
        let (store, client, order) = setup().await;
        let outcome = reconcile_order(&store, &client, order.id).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotYetKnown);
        let stored = store.order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Registered);
    }

    #[tokio::test]
    async fn test_missing_order() {
        let (store, client, _) = setup().await;
        let outcome = reconcile_order(&store, &client, OrderId::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Missing);
        assert_eq!(client.total_calls(), 0);
    }
}
