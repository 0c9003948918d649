use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a requested quantity is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantityError {
    #[error("quantity must be greater than zero")]
    Zero,

    #[error("quantity must not be negative: {0}")]
    Negative(f64),

    #[error("quantity must be a whole number: {0}")]
    Fractional(f64),

    #[error("quantity out of range: {0}")]
    OutOfRange(f64),

    #[error("quantity is not a number: {0:?}")]
    Unparseable(String),
}

/// A strictly positive whole number of units.
///
/// Every quantity that moves stock (reservations, line items, intake) goes
/// through this type, so fractional and non-positive amounts never reach the
/// ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    /// Creates a quantity, rejecting zero.
    pub fn new(units: u32) -> Result<Self, QuantityError> {
        if units == 0 {
            return Err(QuantityError::Zero);
        }
        Ok(Self(units))
    }

    /// Returns the number of units.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;

    fn try_from(units: u32) -> Result<Self, Self::Error> {
        Self::new(units)
    }
}

impl TryFrom<f64> for Quantity {
    type Error = QuantityError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_nan() {
            return Err(QuantityError::Unparseable(value.to_string()));
        }
        if value < 0.0 {
            return Err(QuantityError::Negative(value));
        }
        if value.fract() != 0.0 {
            return Err(QuantityError::Fractional(value));
        }
        if value > f64::from(u32::MAX) {
            return Err(QuantityError::OutOfRange(value));
        }
        Self::new(value as u32)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl std::str::FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| QuantityError::Unparseable(s.to_string()))?;
        Self::try_from(value)
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
