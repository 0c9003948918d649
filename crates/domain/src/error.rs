//! Domain error types.

use common::{ItemId, PaymentId, QuantityError, SaleId};
use thiserror::Error;

use crate::payment::PaymentStatus;
use crate::sale::SaleState;

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt {entity} record {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A value does not fit the column it is written to.
    #[error("Cannot store {entity} {id}: {reason}")]
    OutOfRange {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A write conflicted with a uniqueness rule of the store.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// A failure injected into the in-memory store.
    #[error("Injected store failure: {0}")]
    Injected(String),
}

/// Stable classification of a [`DomainError`], used for metrics labels and
/// for matching without caring about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ItemNotFound,
    SaleNotFound,
    PaymentNotFound,
    SaleNotActive,
    SaleAlreadyVoided,
    SaleAlreadyPaid,
    InsufficientStock,
    InvalidQuantity,
    PaymentNotPending,
    ItemInUse,
    InvalidRequest,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ItemNotFound => "item_not_found",
            ErrorKind::SaleNotFound => "sale_not_found",
            ErrorKind::PaymentNotFound => "payment_not_found",
            ErrorKind::SaleNotActive => "sale_not_active",
            ErrorKind::SaleAlreadyVoided => "sale_already_voided",
            ErrorKind::SaleAlreadyPaid => "sale_already_paid",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::InvalidQuantity => "invalid_quantity",
            ErrorKind::PaymentNotPending => "payment_not_pending",
            ErrorKind::ItemInUse => "item_in_use",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Inventory item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Sale not found: {0}")]
    SaleNotFound(SaleId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The sale is not in a state that allows the operation.
    #[error("Sale {sale_id} is {state}, cannot {action}")]
    SaleNotActive {
        sale_id: SaleId,
        state: SaleState,
        action: &'static str,
    },

    #[error("Sale {0} is already voided")]
    SaleAlreadyVoided(SaleId),

    /// The sale has a confirmed payment.
    #[error("Sale {0} already has a confirmed payment")]
    SaleAlreadyPaid(SaleId),

    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        requested: u32,
        available: u32,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),

    #[error("Payment {payment_id} is {status}, expected pending")]
    PaymentNotPending {
        payment_id: PaymentId,
        status: PaymentStatus,
    },

    /// The item is referenced by a sale that has not been deleted.
    #[error("Item {item_id} is referenced by sale {sale_id}")]
    ItemInUse { item_id: ItemId, sale_id: SaleId },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl DomainError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::ItemNotFound(_) => ErrorKind::ItemNotFound,
            DomainError::SaleNotFound(_) => ErrorKind::SaleNotFound,
            DomainError::PaymentNotFound(_) => ErrorKind::PaymentNotFound,
            DomainError::SaleNotActive { .. } => ErrorKind::SaleNotActive,
            DomainError::SaleAlreadyVoided(_) => ErrorKind::SaleAlreadyVoided,
            DomainError::SaleAlreadyPaid(_) => ErrorKind::SaleAlreadyPaid,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            DomainError::InvalidQuantity(_) => ErrorKind::InvalidQuantity,
            DomainError::PaymentNotPending { .. } => ErrorKind::PaymentNotPending,
            DomainError::ItemInUse { .. } => ErrorKind::ItemInUse,
            DomainError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DomainError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DomainError::InvalidRequest(message.into())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_become_persistence_failures() {
        let err: DomainError = StoreError::Injected("disk full".into()).into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn quantity_errors_become_invalid_quantity() {
        let err: DomainError = QuantityError::Zero.into();
        assert_eq!(err.kind(), ErrorKind::InvalidQuantity);
    }

    #[test]
    fn insufficient_stock_message() {
        let item_id = ItemId::new();
        let err = DomainError::InsufficientStock {
            item_id,
            requested: 3,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            format!("Insufficient stock for item {item_id}: requested 3, available 1")
        );
    }
}
