//! User-facing account operations
//!
//! Order submission and withdrawal creation are the synchronous entry
//! points; both run against the ledger store with the same row-lock
//! discipline as the background reconciliation.

pub mod orders;
pub mod service;

pub use orders::{SubmitOutcome, attach_order};
pub use service::AccountService;
