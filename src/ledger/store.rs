//! Ledger store ports
//!
//! `LedgerStore` is the relational store seen by the engine; `LedgerTx` is
//! one open transaction on it. All cross-task coordination happens through
//! the row locks a `LedgerTx` takes, never through in-process shared locks.
//!
//! # Lock granularity
//!
//! - order row: [`LedgerTx::lock_order`]
//! - user row: [`LedgerTx::lock_user_balance`], also taken implicitly by
//!   [`LedgerTx::append_entry`]
//!
//! A transaction dropped without [`LedgerTx::commit`] is rolled back.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::models::{
    LockedOrder, Order, OrderInsert, OrderStatus, Transaction, TransactionKind, User,
};
use crate::core_types::{OrderId, UserId};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Snapshot of committed rows per statement
    ReadCommitted,
    /// Strongest level; conflicting transactions fail with
    /// [`LedgerError::LockContention`]
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Open a transaction
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn LedgerTx>, LedgerError>;

    /// Register a user with a zero balance. A taken login is `LoginTaken`.
    async fn create_user(&self, login: &str) -> Result<User, LedgerError>;

    async fn user(&self, id: UserId) -> Result<Option<User>, LedgerError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, LedgerError>;

    async fn order_by_number(&self, external_id: &str) -> Result<Option<Order>, LedgerError>;

    /// A user's orders, oldest first
    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError>;

    /// A user's ledger entries of one kind, newest first
    async fn entries_by_user(
        &self,
        user_id: UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Σ amount of a user's entries of one kind (zero when none)
    async fn entry_sum(&self, user_id: UserId, kind: TransactionKind)
    -> Result<Decimal, LedgerError>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Ids of orders in a non-terminal status
    async fn unsettled_order_ids(&mut self) -> Result<Vec<OrderId>, LedgerError>;

    /// Take the exclusive order-row lock and read the row.
    /// `None` if the order does not exist.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<LockedOrder>, LedgerError>;

    /// Write status and accrual onto an order row
    async fn update_order(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), LedgerError>;

    /// Insert an order unless its external number is taken
    async fn insert_order(&mut self, order: &Order) -> Result<OrderInsert, LedgerError>;

    /// Take the exclusive user-row lock and read the balance
    async fn lock_user_balance(&mut self, user_id: UserId) -> Result<Decimal, LedgerError>;

    /// Append a ledger entry and apply its signed amount to the owner's
    /// balance, as one unit.
    async fn append_entry(&mut self, entry: &Transaction) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
    }
}
