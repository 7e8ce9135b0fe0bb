//! Ledger: users, orders, and the append-only transaction log
//!
//! The store is reached only through [`LedgerStore`] and [`LedgerTx`].
//! Two adapters ship with the crate:
//!
//! - [`PgLedgerStore`]: PostgreSQL, row locks via `SELECT ... FOR UPDATE`
//! - [`MemoryLedgerStore`]: in-process, same locking discipline

pub mod error;
pub mod memory;
pub mod models;
pub mod order_number;
pub mod postgres;
pub mod store;

pub use error::LedgerError;
pub use memory::MemoryLedgerStore;
pub use models::{
    BalanceAudit, BalanceSummary, LockedOrder, Order, OrderInsert, OrderStatus, Transaction,
    TransactionKind, User,
};
pub use order_number::{
    MAX_ORDER_NUMBER_LEN, OrderNumber, ValidationError, luhn_check_digit, luhn_valid,
};
pub use postgres::PgLedgerStore;
pub use store::{IsolationLevel, LedgerStore, LedgerTx};
