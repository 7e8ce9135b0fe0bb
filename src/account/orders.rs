//! Order submission conflict resolution
//!
//! External numbers are globally unique. A repeat by the owner is a soft
//! success; anyone else gets a hard conflict.

use crate::core_types::{OrderId, UserId};
use crate::ledger::{LedgerError, LedgerTx, Order, OrderInsert, OrderNumber};

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// New order row, status REGISTERED
    Accepted(Order),
    /// Same user submitted this number before
    AlreadyAccepted(OrderId),
}

impl SubmitOutcome {
    pub fn order_id(&self) -> OrderId {
        match self {
            SubmitOutcome::Accepted(order) => order.id,
            SubmitOutcome::AlreadyAccepted(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }

    /// Report a repeat as [`LedgerError::SoftConflict`]
    pub fn into_result(self, number: &OrderNumber) -> Result<Order, LedgerError> {
        match self {
            SubmitOutcome::Accepted(order) => Ok(order),
            SubmitOutcome::AlreadyAccepted(order_id) => Err(LedgerError::SoftConflict {
                number: number.to_string(),
                order_id,
            }),
        }
    }
}

/// Insert `number` for `user_id`, or attach to the caller's existing order,
/// inside an open transaction.
pub async fn attach_order(
    tx: &mut dyn LedgerTx,
    user_id: UserId,
    number: &OrderNumber,
) -> Result<SubmitOutcome, LedgerError> {
    match tx
        .insert_order(&Order::registered(number.as_str(), user_id))
        .await?
    {
        OrderInsert::Created(order) => Ok(SubmitOutcome::Accepted(order)),
        OrderInsert::Existing { order_id, user_id: owner } if owner == user_id => {
            Ok(SubmitOutcome::AlreadyAccepted(order_id))
        }
        OrderInsert::Existing { .. } => Err(LedgerError::Conflict {
            number: number.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{IsolationLevel, LedgerStore, MemoryLedgerStore};

    #[tokio::test]
    async fn test_attach_order_outcomes() {
        let store = MemoryLedgerStore::new();
        let alice = store.create_user("alice").await.unwrap();
        let bob = store.create_user("bob").await.unwrap();
        let number = OrderNumber::new("79927398713").unwrap();

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let first = attach_order(tx.as_mut(), alice.id, &number).await.unwrap();
        assert!(first.is_new());
        tx.commit().await.unwrap();

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let again = attach_order(tx.as_mut(), alice.id, &number).await.unwrap();
        assert_eq!(again, SubmitOutcome::AlreadyAccepted(first.order_id()));

        let err = attach_order(tx.as_mut(), bob.id, &number).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { .. }));
    }

    #[test]
    fn test_into_result_reports_soft_conflict() {
        let number = OrderNumber::new("79927398713").unwrap();
        let id = OrderId::new_v4();
        let err = SubmitOutcome::AlreadyAccepted(id)
            .into_result(&number)
            .unwrap_err();
        assert!(matches!(err, LedgerError::SoftConflict { order_id, .. } if order_id == id));
        assert_eq!(err.http_status(), 200);
    }
}
