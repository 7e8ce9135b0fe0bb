//! Ledger data model: users, orders, ledger entries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use crate::core_types::{OrderId, TransactionId, UserId};

// ============================================================================
// Order Status
// ============================================================================

/// Order lifecycle status
///
/// Stored as TEXT. Only the reconciliation job moves an order out of
/// `Registered`; `Invalid` and `Processed` are terminal.
///
/// ```text
/// REGISTERED → PROCESSING → PROCESSED
///      ↓            ↓
///   INVALID      INVALID
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// Statuses the poll trigger scans for
    pub const UNSETTLED: [OrderStatus; 2] = [OrderStatus::Registered, OrderStatus::Processing];

    /// Check if this is a terminal status (never revisited)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

// ============================================================================
// Transaction Kind
// ============================================================================

/// Ledger entry kind, stored as SMALLINT `type_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransactionKind {
    /// Credit from a settled order
    Replenishment = 1,
    /// Debit requested by the user
    Withdrawal = 2,
}

impl TransactionKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionKind::Replenishment),
            2 => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }

    /// Signed effect of an entry of this kind on the balance
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionKind::Replenishment => amount,
            TransactionKind::Withdrawal => -amount,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Replenishment => "REPLENISHMENT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rows
// ============================================================================

/// User account (credentials live outside this crate)
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Order as stored
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub external_id: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    /// Present only when `status == Processed`
    pub accrual: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Fresh order in REGISTERED status
    pub fn registered(external_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            id: OrderId::new_v4(),
            external_id: external_id.into(),
            user_id,
            status: OrderStatus::Registered,
            accrual: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub external_order_id: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        user_id: UserId,
        order_id: OrderId,
        external_order_id: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::new_v4(),
            kind,
            user_id,
            order_id,
            external_order_id: external_order_id.into(),
            amount,
            created_at: Utc::now(),
        }
    }

    /// Signed effect on the owner's balance
    pub fn balance_delta(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}

/// Snapshot of an order row taken under its exclusive lock
#[derive(Debug, Clone, PartialEq)]
pub struct LockedOrder {
    pub id: OrderId,
    pub external_id: String,
    pub user_id: UserId,
    pub status: OrderStatus,
}

impl From<&Order> for LockedOrder {
    fn from(o: &Order) -> Self {
        Self {
            id: o.id,
            external_id: o.external_id.clone(),
            user_id: o.user_id,
            status: o.status,
        }
    }
}

/// Outcome of inserting an order row inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum OrderInsert {
    /// New row written (visible to others once the transaction commits)
    Created(Order),
    /// The external number is already taken; owner of the existing row
    Existing { order_id: OrderId, user_id: UserId },
}

/// Balance view for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSummary {
    /// Denormalised balance counter
    pub current: Decimal,
    /// Sum of all WITHDRAWAL entries
    pub withdrawn: Decimal,
}

/// Result of checking `balance == Σ replenishments − Σ withdrawals`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceAudit {
    pub balance: Decimal,
    pub replenished: Decimal,
    pub withdrawn: Decimal,
}

impl BalanceAudit {
    pub fn ledger_sum(&self) -> Decimal {
        self.replenished - self.withdrawn
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum()
    }
}
