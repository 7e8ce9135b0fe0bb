//! Core types used throughout the system
//!
//! Identifiers are UUIDs generated by the application, never by the store,
//! so that a row's identity is known before its transaction commits.

use uuid::Uuid;

/// User ID - owner of a balance and of submitted orders.
pub type UserId = Uuid;

/// Order ID - internal identity of an order row.
///
/// Distinct from the external order number (the Luhn-valid digit string
/// users submit), which is globally unique but owned by the user.
pub type OrderId = Uuid;

/// Transaction ID - identity of an append-only ledger entry
pub type TransactionId = Uuid;
