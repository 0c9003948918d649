//! Sale state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The state of a sale in its lifecycle.
///
/// State transitions:
/// ```text
/// Draft ──► Active ──┬──► Voided ──► Deleted
///                    └──────────────► Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaleState {
    /// Lines are being reserved; never persisted.
    #[default]
    Draft,

    /// Stock is reserved or sold to this sale.
    Active,

    /// The sale was cancelled and its stock returned.
    Voided,

    /// The sale was removed (terminal state). The row is kept.
    Deleted,
}

impl SaleState {
    /// Returns true if lines and discount can be edited in this state.
    pub fn can_edit(&self) -> bool {
        matches!(self, SaleState::Active)
    }

    /// Returns true if the sale can be voided in this state.
    pub fn can_void(&self) -> bool {
        matches!(self, SaleState::Active)
    }

    /// Returns true if the sale can be deleted in this state.
    pub fn can_delete(&self) -> bool {
        matches!(self, SaleState::Active | SaleState::Voided)
    }

    /// Returns true if payments can be recorded or confirmed in this state.
    pub fn accepts_payments(&self) -> bool {
        matches!(self, SaleState::Active)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleState::Deleted)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleState::Draft => "draft",
            SaleState::Active => "active",
            SaleState::Voided => "voided",
            SaleState::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for SaleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SaleState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SaleState::Draft),
            "active" => Ok(SaleState::Active),
            "voided" => Ok(SaleState::Voided),
            "deleted" => Ok(SaleState::Deleted),
            other => Err(DomainError::invalid(format!("unknown sale state {other:?}"))),
        }
    }
}
