//! Reconciliation engine for inventory, sales and payments.
//!
//! This crate keeps stock levels consistent with sales and their payments.
//!
//! The [`Controller`] runs each sale, payment and intake action as one
//! atomic unit:
//! 1. Lock the sale and items involved
//! 2. Load them into a ledger inside a store transaction
//! 3. Apply the change and persist it
//! 4. Record an audit entry
//!
//! If any step fails, ledger work already done is compensated in reverse
//! order and the transaction is rolled back.
//!
//! The [`ConsistencyAuditor`] scans stored state for drift between items and
//! the sales referring to them, and repairs it.

pub mod auditor;
pub mod config;
pub mod controller;
pub mod error;
pub mod locks;
pub mod telemetry;

pub use auditor::{ConsistencyAuditor, RepairReport, Unrepaired, Violation, ViolationKind, check};
pub use config::{Config, LogFormat};
pub use controller::Controller;
pub use error::{ReconcileError, Result};
pub use locks::{LockGuard, LockKey, LockTable};
