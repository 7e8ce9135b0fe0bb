//! External order number validation
//!
//! Order numbers are digit strings protected by a Luhn check digit.
//! The inner field is private to force validation through the public API.

use std::fmt;

// ============================================================================
// Validation Errors
// ============================================================================

/// Validation errors for external order numbers
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Order number is empty")]
    Empty,

    #[error("Order number is too long: {actual} digits (max {max})")]
    TooLong { max: usize, actual: usize },

    #[error("Order number must contain digits only: got '{got}'")]
    NonDigit { got: String },

    #[error("Order number fails Luhn checksum: '{got}'")]
    ChecksumMismatch { got: String },
}

/// Upper bound on accepted number length
pub const MAX_ORDER_NUMBER_LEN: usize = 64;

// ============================================================================
// OrderNumber - Validated External Order Number (Private Fields)
// ============================================================================

/// Validated external order number (digits only, Luhn-valid)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Create a new validated OrderNumber
    ///
    /// Surrounding whitespace is trimmed (request bodies often carry a
    /// trailing newline).
    ///
    /// # Examples
    /// ```
    /// use accrual_ledger::ledger::OrderNumber;
    ///
    /// let n = OrderNumber::new("79927398713").unwrap();
    /// assert_eq!(n.as_str(), "79927398713");
    ///
    /// assert!(OrderNumber::new("79927398710").is_err()); // bad check digit
    /// ```
    pub fn new(number: &str) -> Result<Self, ValidationError> {
        let number = number.trim();

        if number.is_empty() {
            return Err(ValidationError::Empty);
        }

        if number.len() > MAX_ORDER_NUMBER_LEN {
            return Err(ValidationError::TooLong {
                max: MAX_ORDER_NUMBER_LEN,
                actual: number.len(),
            });
        }

        if !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::NonDigit {
                got: number.to_string(),
            });
        }

        if !luhn_valid(number) {
            return Err(ValidationError::ChecksumMismatch {
                got: number.to_string(),
            });
        }

        Ok(Self(number.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Luhn
// ============================================================================

/// Weighted digit sum, doubling every second digit from the right.
///
/// `offset` shifts which digits are doubled: 0 when the check digit is
/// already present, 1 when it is about to be appended.
fn luhn_sum(digits: &str, offset: usize) -> u32 {
    digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if (i + offset) % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum()
}

/// True if `digits` (ASCII digits only) passes the Luhn check
pub fn luhn_valid(digits: &str) -> bool {
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && luhn_sum(digits, 0) % 10 == 0
}

/// Check digit that makes `payload` + digit Luhn-valid
///
/// Returns `None` if `payload` is empty or contains non-digits.
pub fn luhn_check_digit(payload: &str) -> Option<char> {
    if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let check = (10 - luhn_sum(payload, 1) % 10) % 10;
    char::from_digit(check, 10)
}
