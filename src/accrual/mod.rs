//! Accrual provider boundary
//!
//! The provider is the authority on order status and accrual amount. It is
//! slow and unreliable; callers wrap it in the retry policy.

pub mod client;
pub mod error;
#[cfg(feature = "mock-accrual")]
pub mod mock;
pub mod types;

pub use client::{AccrualClient, HttpAccrualClient};
pub use error::RemoteError;
#[cfg(feature = "mock-accrual")]
pub use mock::{FaultInjection, MockAccrualProvider, ScriptedAccrualClient};
pub use types::AccrualOrder;
