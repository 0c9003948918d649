//! Domain layer for the inventory–sale reconciliation engine.
//!
//! This crate provides:
//! - Inventory items and the journaled [`Ledger`] through which stock moves
//! - The [`Sale`] aggregate with its state machine and invoice numbering
//! - Payments and their confirm/reject lifecycle
//! - Commands accepted by the controller
//! - The [`Store`] abstraction with in-memory and PostgreSQL backends

pub mod commands;
pub mod error;
pub mod inventory;
pub mod payment;
pub mod sale;
pub mod store;

pub use commands::{
    Command, ConfirmPayment, CreateSale, DeleteSale, EditSale, RecordPayment, RegisterItem,
    RejectPayment, RetireItem, UpdateItem, VoidSale,
};
pub use error::{DomainError, ErrorKind, Result, StoreError};
pub use inventory::{
    Checkpoint, CompensationReport, InventoryItem, InventorySummary, ItemChanges, ItemSnapshot,
    ItemStatus, Ledger, LedgerStep, NewItem, Reservation, ReservationState, ReservationToken,
    derive_status,
};
pub use payment::{
    NewPayment, Payment, PaymentMethod, PaymentSnapshot, PaymentStatus, SUPERSEDED_REASON,
};
pub use sale::{
    Closure, InvoiceNumber, NewSale, Sale, SaleLine, SaleLineItem, SaleSnapshot, SaleState,
    SalesReport,
};
pub use store::{InMemoryStore, PostgresStore, Store, StoreResult, StoreTx};
