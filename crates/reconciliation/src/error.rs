//! Reconciliation error types.

use audit_log::{AuditError, Operation};
use domain::{DomainError, ErrorKind, StoreError};
use thiserror::Error;

/// Errors returned by the controller and the consistency auditor.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A domain or store error, passed through unchanged.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The operation failed and undoing its partial work failed too.
    ///
    /// `compensated` lists the steps that were undone, `outstanding` the
    /// ones that were not.
    #[error("{operation} failed and was not fully compensated ({} outstanding): {source}", .outstanding.len())]
    CompensationFailed {
        operation: Operation,
        source: DomainError,
        compensated: Vec<String>,
        outstanding: Vec<String>,
    },

    /// Reading the audit log failed.
    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),
}

impl ReconcileError {
    /// Classifies the error. Compensation and audit failures count as
    /// persistence failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Domain(e) => e.kind(),
            ReconcileError::CompensationFailed { .. } | ReconcileError::Audit(_) => {
                ErrorKind::PersistenceFailure
            }
        }
    }

    /// Returns the underlying domain error, if any.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ReconcileError::Domain(e) => Some(e),
            ReconcileError::CompensationFailed { source, .. } => Some(source),
            ReconcileError::Audit(_) => None,
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        ReconcileError::Domain(DomainError::from(e))
    }
}

/// Convenience type alias for reconciliation results.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use common::SaleId;

    use super::*;

    #[test]
    fn domain_errors_keep_their_kind() {
        let err = ReconcileError::from(DomainError::SaleAlreadyVoided(SaleId::new()));
        assert_eq!(err.kind(), ErrorKind::SaleAlreadyVoided);
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::SaleAlreadyVoided(_))
        ));
    }

    #[test]
    fn compensation_failure_is_a_persistence_failure() {
        let err = ReconcileError::CompensationFailed {
            operation: Operation::CreateSale,
            source: DomainError::from(StoreError::Injected("save failed".into())),
            compensated: vec!["undo reserve".into()],
            outstanding: vec!["rollback transaction".into()],
        };
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(err.to_string().contains("1 outstanding"));
    }
}
