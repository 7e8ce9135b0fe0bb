//! Accrual provider wire types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::RemoteError;
use crate::ledger::OrderStatus;

/// `GET /api/orders/{number}` response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualOrder {
    /// External order number
    pub order: String,
    pub status: OrderStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
}

impl AccrualOrder {
    pub fn new(order: impl Into<String>, status: OrderStatus, accrual: Option<Decimal>) -> Self {
        Self {
            order: order.into(),
            status,
            accrual,
        }
    }

    pub fn processed(order: impl Into<String>, accrual: Decimal) -> Self {
        Self::new(order, OrderStatus::Processed, Some(accrual))
    }

    /// Sanity-check a decoded response for `requested`.
    ///
    /// A negative accrual or a response for another number is a decode
    /// error. An accrual reported alongside a non-PROCESSED status is dropped.
    pub fn checked(mut self, requested: &str) -> Result<Self, RemoteError> {
        if self.order != requested {
            return Err(RemoteError::Decode(format!(
                "response for order {} while asking for {}",
                self.order, requested
            )));
        }
        if let Some(accrual) = self.accrual
            && accrual < Decimal::ZERO
        {
            return Err(RemoteError::Decode(format!("negative accrual {accrual}")));
        }
        if self.status != OrderStatus::Processed {
            self.accrual = None;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_provider_json() {
        let order: AccrualOrder =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":729.98}"#)
                .unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(order.accrual, Some(Decimal::new(72998, 2)));

        let order: AccrualOrder =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        assert_eq!(order.status, OrderStatus::Registered);
        assert_eq!(order.accrual, None);
    }

    #[test]
    fn test_encode_omits_missing_accrual() {
        let json =
            serde_json::to_string(&AccrualOrder::new("0", OrderStatus::Invalid, None)).unwrap();
        assert_eq!(json, r#"{"order":"0","status":"INVALID"}"#);
    }

    #[test]
    fn test_checked_rejects_negative_accrual() {
        let order = AccrualOrder::processed("79927398713", Decimal::new(-1, 0));
        assert!(matches!(
            order.checked("79927398713"),
            Err(RemoteError::Decode(_))
        ));
    }

    #[test]
    fn test_checked_rejects_foreign_order() {
        let order = AccrualOrder::processed("12345678903", Decimal::ONE);
        assert!(order.checked("79927398713").is_err());
    }

    #[test]
    fn test_checked_drops_accrual_unless_processed() {
        let order = AccrualOrder::new("79927398713", OrderStatus::Processing, Some(Decimal::TEN))
            .checked("79927398713")
            .unwrap();
        assert_eq!(order.accrual, None);
    }
}
