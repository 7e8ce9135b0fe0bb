//! Accrual Ledger - loyalty accrual reconciliation and balance ledger
//!
//! Reconciles order status from an external accrual provider with a local
//! ledger and keeps every user's balance equal to the sum of its entries.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, OrderId, etc.)
//! - [`config`] - YAML configuration with env / CLI overrides
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and migrations
//! - [`ledger`] - Data model, order numbers, store ports and adapters
//! - [`accrual`] - Accrual provider client (and mock provider)
//! - [`sync`] - Retry policy, worker pool, reconciliation job, poll trigger
//! - [`account`] - Order submission, withdrawals, balance read models
//! - [`engine`] - LoyaltyEngine facade

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod logging;

pub mod account;
pub mod accrual;
pub mod engine;
pub mod ledger;
pub mod sync;

// Convenient re-exports at crate root
pub use account::{AccountService, SubmitOutcome};
pub use accrual::{AccrualClient, AccrualOrder, HttpAccrualClient, RemoteError};
pub use config::AppConfig;
pub use core_types::{OrderId, TransactionId, UserId};
pub use engine::LoyaltyEngine;
pub use ledger::{
    LedgerError, LedgerStore, MemoryLedgerStore, Order, OrderNumber, OrderStatus,
    PgLedgerStore, Transaction, TransactionKind,
};
pub use sync::{AccrualSync, RetryPolicy, WorkerPool};
