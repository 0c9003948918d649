use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

/// Error returned when a decimal amount string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount: {0:?}")]
pub struct MoneyParseError(pub String);

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a whole dollar value.
    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity, saturating at the representable bounds.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents.saturating_mul(i64::from(quantity)),
        }
    }

    /// Multiplies by a quantity. Returns `None` on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.cents.checked_mul(i64::from(quantity)).map(Money::from_cents)
    }

    /// Adds two amounts. Returns `None` on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.cents.checked_add(rhs.cents).map(Money::from_cents)
    }

    /// Adds two amounts, saturating at the representable bounds.
    pub fn saturating_add(&self, rhs: Money) -> Money {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }

    /// Subtracts `rhs`, saturating at the representable bounds.
    pub fn saturating_sub(&self, rhs: Money) -> Money {
        Money {
            cents: self.cents.saturating_sub(rhs.cents),
        }
    }

    /// Parses a decimal amount such as `"12.5"` or `"-3.07"`.
    ///
    /// At most two fractional digits are accepted.
    pub fn parse(s: &str) -> Result<Self, MoneyParseError> {
        parse_hundredths(s)
            .map(Money::from_cents)
            .ok_or_else(|| MoneyParseError(s.to_string()))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::str::FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

// Operators saturate. Use the checked methods where overflow must be refused.
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_sub(rhs.cents),
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents = self.cents.saturating_add(rhs.cents);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Parses a fixed-point decimal with at most two fractional digits into
/// hundredths.
fn parse_hundredths(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let value = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -value } else { value })
}

/// Errors produced when constructing a [`Discount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountError {
    #[error("discount must be between 0 and 100 percent, got {basis_points} basis points")]
    OutOfRange { basis_points: u32 },

    #[error("invalid discount: {0:?}")]
    Unparseable(String),
}

/// Sale-level discount, a percentage between 0 and 100 with two decimals.
///
/// Stored as basis points (hundredths of a percent) so that applying it stays
/// in integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Discount(u32);

impl Discount {
    const FULL: u32 = 10_000;

    /// No discount.
    pub fn none() -> Self {
        Self(0)
    }

    /// Creates a discount from a whole percentage.
    pub fn percent(percent: u32) -> Result<Self, DiscountError> {
        Self::from_basis_points(percent.saturating_mul(100))
    }

    /// Creates a discount from basis points (`1250` is 12.5%).
    pub fn from_basis_points(basis_points: u32) -> Result<Self, DiscountError> {
        if basis_points > Self::FULL {
            return Err(DiscountError::OutOfRange { basis_points });
        }
        Ok(Self(basis_points))
    }

    /// Returns the discount in basis points.
    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// Applies the discount to a subtotal, rounding half away from zero to
    /// the cent.
    pub fn apply(&self, subtotal: Money) -> Money {
        let numerator = i128::from(subtotal.cents()) * i128::from(Self::FULL - self.0);
        let full = i128::from(Self::FULL);
        let half = full / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / full
        } else {
            -((-numerator + half) / full)
        };
        // The result never exceeds the subtotal in magnitude, so it fits in i64.
        Money::from_cents(rounded as i64)
    }
}

impl TryFrom<u32> for Discount {
    type Error = DiscountError;

    fn try_from(basis_points: u32) -> Result<Self, Self::Error> {
        Self::from_basis_points(basis_points)
    }
}

impl From<Discount> for u32 {
    fn from(discount: Discount) -> Self {
        discount.0
    }
}

impl std::str::FromStr for Discount {
    type Err = DiscountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hundredths = parse_hundredths(s.trim_end_matches('%'))
            .ok_or_else(|| DiscountError::Unparseable(s.to_string()))?;
        let basis_points =
            u32::try_from(hundredths).map_err(|_| DiscountError::Unparseable(s.to_string()))?;
        Self::from_basis_points(basis_points)
    }
}

impl std::fmt::Display for Discount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
