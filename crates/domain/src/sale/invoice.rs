use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Human-facing sale number, `INV<YYYYMMDD>-<NNNN>`.
///
/// The sequence restarts every UTC day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    pub fn new(day: NaiveDate, sequence: u32) -> Self {
        Self(format!("INV{}-{:04}", day.format("%Y%m%d"), sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || DomainError::invalid(format!("malformed invoice number {value:?}"));
        let rest = value.strip_prefix("INV").ok_or_else(invalid)?;
        let (day, sequence) = rest.split_once('-').ok_or_else(invalid)?;
        NaiveDate::parse_from_str(day, "%Y%m%d").map_err(|_| invalid())?;
        if sequence.len() < 4 || !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self(value))
    }
}

impl From<InvoiceNumber> for String {
    fn from(number: InvoiceNumber) -> Self {
        number.0
    }
}

impl std::fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
