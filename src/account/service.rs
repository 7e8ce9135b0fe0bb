//! Account service: order submission, withdrawals, balance read models
//!
//! Withdrawals take the same user-row lock the reconciliation job takes for
//! credits, so every balance mutation for one user is totally ordered.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{Instrument, Span, info, warn};

use super::orders::{SubmitOutcome, attach_order};
use crate::core_types::UserId;
use crate::ledger::{
    BalanceAudit, BalanceSummary, IsolationLevel, LedgerError, LedgerStore, Order, OrderNumber,
    Transaction, TransactionKind, User,
};
use crate::sync::RetryPolicy;

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    span: Span,
}

impl AccountService {
    /// `retry` wraps each write transaction; only lock contention and
    /// database errors are retried.
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy, span: Span) -> Self {
        Self { store, retry, span }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn create_user(&self, login: &str) -> Result<User, LedgerError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(LedgerError::InvalidInput("login is empty".to_string()));
        }
        let user = self.store.create_user(login).await?;
        info!(parent: &self.span, user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn user(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.store
            .user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {user_id}")))
    }

    /// Register an order number for `user_id`
    pub async fn submit_order(
        &self,
        user_id: UserId,
        number: &str,
    ) -> Result<SubmitOutcome, LedgerError> {
        let number = OrderNumber::new(number)?;
        self.user(user_id).await?;

        let number = &number;
        let outcome = self
            .retry
            .retry(move |_| async move {
                let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
                let outcome = attach_order(tx.as_mut(), user_id, number).await?;
                tx.commit().await?;
                Ok::<_, LedgerError>(outcome)
            })
            .instrument(self.span.clone())
            .await?;

        match &outcome {
            SubmitOutcome::Accepted(order) => {
                info!(parent: &self.span, order_id = %order.id, %number, "Order accepted")
            }
            SubmitOutcome::AlreadyAccepted(order_id) => {
                info!(parent: &self.span, %order_id, %number, "Order already accepted")
            }
        }
        Ok(outcome)
    }

    /// Debit `amount` from `user_id` against order `number`.
    ///
    /// The order is created or attached in the same serializable
    /// transaction, so every withdrawal links to a tracked order.
    pub async fn create_withdrawal(
        &self,
        user_id: UserId,
        number: &str,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let number = OrderNumber::new(number)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }

        let number = &number;
        let entry = self
            .retry
            .retry(move |_| self.withdraw_once(user_id, number, amount))
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            %user_id,
            transaction_id = %entry.id,
            %number,
            %amount,
            "Withdrawal recorded"
        );
        Ok(entry)
    }

    async fn withdraw_once(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;

        let order_id = attach_order(tx.as_mut(), user_id, number)
            .await?
            .order_id();

        let available = tx.lock_user_balance(user_id).await?;
        if available < amount {
            tx.rollback().await?;
            warn!(%user_id, %available, requested = %amount, "Insufficient funds");
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        let entry = Transaction::new(
            TransactionKind::Withdrawal,
            user_id,
            order_id,
            number.as_str(),
            amount,
        );
        tx.append_entry(&entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<BalanceSummary, LedgerError> {
        let user = self.user(user_id).await?;
        let withdrawn = self
            .store
            .entry_sum(user_id, TransactionKind::Withdrawal)
            .await?;
        Ok(BalanceSummary {
            current: user.balance,
            withdrawn,
        })
    }

    /// Withdrawals, newest first
    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        self.store
            .entries_by_user(user_id, TransactionKind::Withdrawal)
            .await
    }

    /// Orders by upload time
    pub async fn orders(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        self.store.orders_by_user(user_id).await
    }

    /// Compare the balance counter with the ledger.
    ///
    /// The reads are not one snapshot; run it when no write for the user is
    /// in flight.
    pub async fn audit_balance(&self, user_id: UserId) -> Result<BalanceAudit, LedgerError> {
        let user = self.user(user_id).await?;
        let replenished = self
            .store
            .entry_sum(user_id, TransactionKind::Replenishment)
            .await?;
        let withdrawn = self
            .store
            .entry_sum(user_id, TransactionKind::Withdrawal)
            .await?;
        let audit = BalanceAudit {
            balance: user.balance,
            replenished,
            withdrawn,
        };
        if !audit.is_consistent() {
            warn!(
                parent: &self.span,
                %user_id,
                balance = %audit.balance,
                ledger_sum = %audit.ledger_sum(),
                "Balance drifted from ledger"
            );
        }
        Ok(audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use std::time::Duration;

    fn service() -> AccountService {
        AccountService::new(
            Arc::new(MemoryLedgerStore::new()),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            Span::none(),
        )
    }

    async fn credit(service: &AccountService, user_id: UserId, number: &str, amount: Decimal) {
        let order = service
            .submit_order(user_id, number)
            .await
            .unwrap()
            .order_id();
        let mut tx = service
            .store()
            .begin(IsolationLevel::Serializable)
            .await
            .unwrap();
        tx.append_entry(&Transaction::new(
            TransactionKind::Replenishment,
            user_id,
            order,
            number,
            amount,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_number() {
        let service = service();
        let user = service.create_user("alice").await.unwrap();
        for bad in ["", "abc", "79927398710"] {
            let err = service.submit_order(user.id, bad).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_submit_unknown_user() {
        let service = service();
        let err = service
            .submit_order(UserId::new_v4(), "79927398713")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_withdrawal_debits_balance() {
        let service = service();
        let user = service.create_user("alice").await.unwrap();
        credit(&service, user.id, "79927398713", Decimal::new(100, 0)).await;

        let entry = service
            .create_withdrawal(user.id, "2377225624", Decimal::new(60, 0))
            .await
            .unwrap();
        assert_eq!(entry.kind, TransactionKind::Withdrawal);

        let summary = service.balance(user.id).await.unwrap();
        assert_eq!(summary.current, Decimal::new(40, 0));
        assert_eq!(summary.withdrawn, Decimal::new(60, 0));
        assert!(service.audit_balance(user.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_withdrawal_insufficient_funds_leaves_no_trace() {
        let service = service();
        let user = service.create_user("alice").await.unwrap();
        credit(&service, user.id, "79927398713", Decimal::new(10, 0)).await;

        let err = service
            .create_withdrawal(user.id, "2377225624", Decimal::new(11, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        assert!(service.withdrawals(user.id).await.unwrap().is_empty());
        // The order insert rolled back with the debit
        assert!(
            service
                .store()
                .order_by_number("2377225624")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_withdrawal_rejects_non_positive_amount() {
        let service = service();
        let user = service.create_user("alice").await.unwrap();
        for amount in [Decimal::ZERO, Decimal::new(-5, 0)] {
            let err = service
                .create_withdrawal(user.id, "79927398713", amount)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn test_withdrawal_against_foreign_order_conflicts() {
        let service = service();
        let alice = service.create_user("alice").await.unwrap();
        let bob = service.create_user("bob").await.unwrap();
        credit(&service, bob.id, "12345678903", Decimal::new(50, 0)).await;
        service.submit_order(alice.id, "79927398713").await.unwrap();

        let err = service
            .create_withdrawal(bob.id, "79927398713", Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let service = service();
        assert!(matches!(
            service.create_user("  ").await.unwrap_err(),
            LedgerError::InvalidInput(_)
        ));
        service.create_user("alice").await.unwrap();
        assert!(matches!(
            service.create_user("alice").await.unwrap_err(),
            LedgerError::LoginTaken(_)
        ));
    }
}
