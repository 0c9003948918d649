use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ItemId, PaymentId, SaleId};
use tokio::sync::RwLock;

use super::{Store, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::inventory::InventoryItem;
use crate::payment::{Payment, PaymentStatus};
use crate::sale::Sale;

#[derive(Debug, Default)]
struct Tables {
    items: HashMap<ItemId, InventoryItem>,
    sales: HashMap<SaleId, Sale>,
    payments: HashMap<PaymentId, Payment>,
    invoice_sequences: HashMap<NaiveDate, u32>,
}

#[derive(Debug, Default)]
struct Faults {
    commits: u32,
    rollbacks: u32,
    saves: u32,
}

/// In-memory store for tests and database-less runs.
///
/// Transactions stage their writes privately and apply them all at once on
/// commit. There are no row locks: callers serialize conflicting work
/// themselves. Invoice sequence numbers are handed out immediately and are
/// not returned on rollback.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next commit fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.faults().commits += 1;
    }

    /// Makes the next rollback fail.
    pub fn fail_next_rollback(&self) {
        self.faults().rollbacks += 1;
    }

    /// Makes the next `save_*` call fail.
    pub fn fail_next_save(&self) {
        self.faults().saves += 1;
    }

    /// Returns the number of items stored.
    pub async fn item_count(&self) -> usize {
        self.tables.read().await.items.len()
    }
}

fn take_fault(faults: &Mutex<Faults>, pick: impl FnOnce(&mut Faults) -> &mut u32) -> bool {
    let mut faults = faults.lock().unwrap_or_else(|e| e.into_inner());
    let counter = pick(&mut faults);
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn sorted_items(mut items: Vec<InventoryItem>) -> Vec<InventoryItem> {
    items.sort_by_key(|i| (i.created_at(), i.id()));
    items
}

fn sorted_sales(mut sales: Vec<Sale>) -> Vec<Sale> {
    sales.sort_by_key(|s| (s.created_at(), s.id()));
    sales
}

fn sorted_payments(mut payments: Vec<Payment>) -> Vec<Payment> {
    payments.sort_by_key(|p| (p.recorded_at(), p.id()));
    payments
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(InMemoryTx {
            tables: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            items: HashMap::new(),
            sales: HashMap::new(),
            payments: HashMap::new(),
        }))
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        Ok(self.tables.read().await.items.get(&id).cloned())
    }

    async fn get_sale(&self, id: SaleId) -> StoreResult<Option<Sale>> {
        Ok(self.tables.read().await.sales.get(&id).cloned())
    }

    async fn get_payment(&self, id: PaymentId) -> StoreResult<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn list_items(&self) -> StoreResult<Vec<InventoryItem>> {
        let tables = self.tables.read().await;
        Ok(sorted_items(tables.items.values().cloned().collect()))
    }

    async fn list_sales(&self) -> StoreResult<Vec<Sale>> {
        let tables = self.tables.read().await;
        Ok(sorted_sales(tables.sales.values().cloned().collect()))
    }

    async fn list_payments(&self) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(sorted_payments(tables.payments.values().cloned().collect()))
    }

    async fn payments_with_status(&self, status: PaymentStatus) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(sorted_payments(
            tables
                .payments
                .values()
                .filter(|p| p.status() == status)
                .cloned()
                .collect(),
        ))
    }

    async fn payments_for_sale(&self, sale_id: SaleId) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(sorted_payments(
            tables
                .payments
                .values()
                .filter(|p| p.sale_id() == sale_id)
                .cloned()
                .collect(),
        ))
    }

    async fn sales_for_item(&self, item_id: ItemId) -> StoreResult<Vec<Sale>> {
        let tables = self.tables.read().await;
        Ok(sorted_sales(
            tables
                .sales
                .values()
                .filter(|s| s.line_items().iter().any(|l| l.item_id == item_id))
                .cloned()
                .collect(),
        ))
    }
}

struct InMemoryTx {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Mutex<Faults>>,
    /// `None` marks a deleted item.
    items: HashMap<ItemId, Option<InventoryItem>>,
    sales: HashMap<SaleId, Sale>,
    payments: HashMap<PaymentId, Payment>,
}

impl InMemoryTx {
    fn check_save(&self, what: &str) -> StoreResult<()> {
        if take_fault(&self.faults, |f| &mut f.saves) {
            return Err(StoreError::Injected(format!("save {what} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn item_for_update(&mut self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        if let Some(staged) = self.items.get(&id) {
            return Ok(staged.clone());
        }
        Ok(self.tables.read().await.items.get(&id).cloned())
    }

    async fn sale_for_update(&mut self, id: SaleId) -> StoreResult<Option<Sale>> {
        if let Some(staged) = self.sales.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.tables.read().await.sales.get(&id).cloned())
    }

    async fn payment_for_update(&mut self, id: PaymentId) -> StoreResult<Option<Payment>> {
        if let Some(staged) = self.payments.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.tables.read().await.payments.get(&id).cloned())
    }

    async fn payments_for_sale(&mut self, sale_id: SaleId) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut merged: HashMap<PaymentId, Payment> = tables
            .payments
            .values()
            .filter(|p| p.sale_id() == sale_id)
            .map(|p| (p.id(), p.clone()))
            .collect();
        for payment in self.payments.values().filter(|p| p.sale_id() == sale_id) {
            merged.insert(payment.id(), payment.clone());
        }
        Ok(sorted_payments(merged.into_values().collect()))
    }

    async fn sales_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Sale>> {
        let tables = self.tables.read().await;
        let mut merged: HashMap<SaleId, Sale> = tables
            .sales
            .iter()
            .map(|(id, sale)| (*id, sale.clone()))
            .collect();
        for (id, sale) in &self.sales {
            merged.insert(*id, sale.clone());
        }
        Ok(sorted_sales(
            merged
                .into_values()
                .filter(|s| s.line_items().iter().any(|l| l.item_id == item_id))
                .collect(),
        ))
    }

    async fn save_item(&mut self, item: &InventoryItem) -> StoreResult<()> {
        self.check_save("item")?;
        self.items.insert(item.id(), Some(item.clone()));
        Ok(())
    }

    async fn save_sale(&mut self, sale: &Sale) -> StoreResult<()> {
        self.check_save("sale")?;
        self.sales.insert(sale.id(), sale.clone());
        Ok(())
    }

    async fn save_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.check_save("payment")?;
        if payment.is_pending() {
            let other_pending = self
                .payments_for_sale(payment.sale_id())
                .await?
                .into_iter()
                .any(|p| p.is_pending() && p.id() != payment.id());
            if other_pending {
                return Err(StoreError::Conflict(format!(
                    "sale {} already has a pending payment",
                    payment.sale_id()
                )));
            }
        }
        self.payments.insert(payment.id(), payment.clone());
        Ok(())
    }

    async fn delete_item(&mut self, id: ItemId) -> StoreResult<()> {
        self.items.insert(id, None);
        Ok(())
    }

    async fn next_invoice_sequence(&mut self, day: NaiveDate) -> StoreResult<u32> {
        let mut tables = self.tables.write().await;
        let counter = tables.invoice_sequences.entry(day).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if take_fault(&self.faults, |f| &mut f.commits) {
            return Err(StoreError::Injected("commit failed".into()));
        }

        let InMemoryTx {
            tables,
            items,
            sales,
            payments,
            ..
        } = *self;
        let mut tables = tables.write().await;
        for (id, item) in items {
            match item {
                Some(item) => {
                    tables.items.insert(id, item);
                }
                None => {
                    tables.items.remove(&id);
                }
            }
        }
        tables.sales.extend(sales);
        tables.payments.extend(payments);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        if take_fault(&self.faults, |f| &mut f.rollbacks) {
            return Err(StoreError::Injected("rollback failed".into()));
        }
        Ok(())
    }
}
