//! Persistence traits and their implementations.
//!
//! A controller operation runs inside one [`StoreTx`]: it loads the records
//! it will change with the `*_for_update` methods, saves them, and commits or
//! rolls back as a whole. [`Store`] also offers plain reads that take no
//! locks, for snapshots and consistency scans.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ItemId, PaymentId, SaleId};

use crate::error::StoreError;
use crate::inventory::InventoryItem;
use crate::payment::{Payment, PaymentStatus};
use crate::sale::Sale;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage for items, sales and payments.
#[async_trait]
pub trait Store: Send + Sync {
    /// Starts a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>>;

    async fn get_sale(&self, id: SaleId) -> StoreResult<Option<Sale>>;

    async fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>>;

    async fn list_items(&self) -> StoreResult<Vec<InventoryItem>>;

    /// Every sale, deleted ones included.
    async fn list_sales(&self) -> StoreResult<Vec<Sale>>;

    async fn list_payments(&self) -> StoreResult<Vec<Payment>>;

    /// Payments in one status, oldest first.
    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>>;

    async fn payments_for_sale(&self, sale_id: SaleId) -> StoreResult<Vec<Payment>>;

    /// Sales with a line for the given item, deleted ones included.
    async fn sales_for_item(&self, item_id: ItemId) -> StoreResult<Vec<Sale>>;
}

/// A store transaction.
///
/// Writes are only visible to other readers after [`commit`](StoreTx::commit).
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Loads an item for modification in this transaction.
    async fn item_for_update(&mut self, id: ItemId) -> StoreResult<Option<InventoryItem>>;

    async fn sale_for_update(&mut self, id: SaleId) -> StoreResult<Option<Sale>>;

    async fn payment_for_update(&mut self, id: PaymentId) -> StoreResult<Option<Payment>>;

    /// Loads every payment of a sale for modification, oldest first.
    async fn payments_for_sale(&mut self, sale_id: SaleId) -> StoreResult<Vec<Payment>>;

    /// Sales with a line for the given item, as seen by this transaction.
    async fn sales_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Sale>>;

    /// Inserts or replaces an item together with its reservations.
    async fn save_item(&mut self, item: &InventoryItem) -> StoreResult<()>;

    /// Inserts or replaces a sale together with its line items.
    async fn save_sale(&mut self, sale: &Sale) -> StoreResult<()>;

    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    async fn delete_item(&mut self, id: ItemId) -> StoreResult<()>;

    /// Returns the next invoice sequence number for a day, starting at 1.
    ///
    /// A number handed out is not given back when the transaction rolls
    /// back, and taking one does not block other transactions until commit.
    async fn next_invoice_sequence(&mut self, day: NaiveDate) -> StoreResult<u32>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        (**self).begin().await
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        (**self).get_item(id).await
    }

    async fn get_sale(&self, id: SaleId) -> StoreResult<Option<Sale>> {
        (**self).get_sale(id).await
    }

    async fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        (**self).get_payment(id).await
    }

    async fn list_items(&self) -> StoreResult<Vec<InventoryItem>> {
        (**self).list_items().await
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        (**self).list_sales().await
    }

    async fn list_payments(&self) -> StoreResult<Vec<Payment>> {
        (**self).list_payments().await
    }

    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>> {
        (**self).payments_with_status(status).await
    }

    async fn payments_for_sale(&self, sale_id: SaleId) -> StoreResult<Vec<Payment>> {
        (**self).payments_for_sale(sale_id).await
    }

    async fn sales_for_item(&self, item_id: ItemId) -> StoreResult<Vec<Sale>> {
        (**self).sales_for_item(item_id).await
    }
}
