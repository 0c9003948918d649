//! Inventory items and the ledger that moves their stock.

mod item;
mod ledger;
mod summary;

pub use item::{
    InventoryItem, ItemChanges, ItemSnapshot, ItemStatus, NewItem, Reservation, ReservationState,
    ReservationToken, derive_status,
};
pub use ledger::{Checkpoint, CompensationReport, Ledger, LedgerStep};
pub use summary::InventorySummary;
