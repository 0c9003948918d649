//! Append-only audit recorder.
//!
//! Every mutation the reconciliation controller attempts, successful or not,
//! ends up here as an [`AuditEntry`]: who did it, what kind of operation it
//! was, which entities it touched and their state before and after.

pub mod entry;
pub mod error;
pub mod filter;
pub mod log;
pub mod memory;
pub mod postgres;

pub use common::{AuditId, ItemId, PaymentId, SaleId};
pub use entry::{AuditEntry, AuditEntryBuilder, Operation, Outcome, Target};
pub use error::{AuditError, Result};
pub use filter::AuditFilter;
pub use log::{AuditLog, AuditLogExt};
pub use memory::InMemoryAuditLog;
pub use postgres::PostgresAuditLog;
