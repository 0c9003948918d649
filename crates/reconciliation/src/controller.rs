//! The reconciliation controller.
//!
//! Every mutation follows the same shape: take the entity locks, open a
//! store transaction, load the affected records into a [`Ledger`], apply the
//! change, persist and commit. A failure at any step undoes the ledger work
//! and rolls the transaction back before the error is returned. Success or
//! failure, one audit entry is written per operation.

use std::sync::Arc;
use std::time::Instant;

use audit_log::{AuditEntry, AuditFilter, AuditLog, Operation, Outcome, Target};
use chrono::{DateTime, Utc};
use common::{Clock, ItemId, PaymentId, SaleId, SystemClock};
use domain::{
    Checkpoint, Command, ConfirmPayment, CreateSale, DeleteSale, DomainError, EditSale,
    InventoryItem, InventorySummary, InvoiceNumber, ItemSnapshot, Ledger, Payment,
    PaymentSnapshot, PaymentStatus, RecordPayment, RegisterItem, RejectPayment, RetireItem,
    SUPERSEDED_REASON, Sale, SaleSnapshot, SaleState, SalesReport, Store, StoreTx, UpdateItem,
    VoidSale,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::auditor::ConsistencyAuditor;
use crate::error::{ReconcileError, Result};
use crate::locks::{LockGuard, LockKey, LockTable};

const VOIDED_REASON: &str = "sale voided";
const DELETED_REASON: &str = "sale deleted";

/// Records shown in an audit entry's before or after state.
#[derive(Debug, Default, Serialize)]
pub(crate) struct StateImage {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sales: Vec<SaleSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payments: Vec<PaymentSnapshot>,
}

impl StateImage {
    pub(crate) fn items(items: Vec<ItemSnapshot>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub(crate) fn into_json(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A committed change, with what the audit entry needs to describe it.
struct Applied<T> {
    value: T,
    targets: Vec<Target>,
    before: StateImage,
    after: StateImage,
}

/// One store transaction plus the ledger working set loaded into it.
pub(crate) struct UnitOfWork {
    operation: Operation,
    pub(crate) tx: Box<dyn StoreTx>,
    pub(crate) ledger: Ledger,
    start: Checkpoint,
    pub(crate) now: DateTime<Utc>,
}

impl UnitOfWork {
    pub(crate) async fn begin<S: Store>(
        store: &S,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let tx = store.begin().await?;
        let ledger = Ledger::new([], now);
        let start = ledger.checkpoint();
        Ok(Self {
            operation,
            tx,
            ledger,
            start,
            now,
        })
    }

    /// Locks and loads items into the ledger. Items already loaded are
    /// skipped.
    pub(crate) async fn load_items(
        &mut self,
        ids: impl IntoIterator<Item = ItemId>,
    ) -> domain::Result<()> {
        for id in ids {
            if self.ledger.contains(id) {
                continue;
            }
            let item = self
                .tx
                .item_for_update(id)
                .await?
                .ok_or(DomainError::ItemNotFound(id))?;
            self.ledger.track(item);
        }
        Ok(())
    }

    async fn load_sale(&mut self, id: SaleId) -> domain::Result<Sale> {
        self.tx
            .sale_for_update(id)
            .await?
            .ok_or(DomainError::SaleNotFound(id))
    }

    pub(crate) fn item_snapshots(&self) -> Vec<ItemSnapshot> {
        self.ledger.items().map(InventoryItem::snapshot).collect()
    }

    /// Writes every item the ledger changed.
    pub(crate) async fn save_items(&mut self) -> domain::Result<()> {
        let touched: Vec<InventoryItem> = self.ledger.touched().cloned().collect();
        for item in &touched {
            self.tx.save_item(item).await?;
        }
        Ok(())
    }

    /// Rejects every pending payment in `payments` and saves it.
    async fn reject_pending(
        &mut self,
        payments: &mut [Payment],
        actor: &str,
        reason: &str,
    ) -> domain::Result<()> {
        for payment in payments.iter_mut().filter(|p| p.is_pending()) {
            payment.reject(actor, reason, self.now)?;
            self.tx.save_payment(payment).await?;
        }
        Ok(())
    }

    /// Commits on success. On failure, undoes the ledger work and rolls the
    /// transaction back.
    pub(crate) async fn settle<T>(self, result: domain::Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.tx.commit().await?;
                Ok(value)
            }
            Err(error) => Err(self.abort(error).await),
        }
    }

    async fn abort(self, error: DomainError) -> ReconcileError {
        let UnitOfWork {
            operation,
            tx,
            mut ledger,
            start,
            ..
        } = self;

        ledger.rollback_to(start);
        let report = ledger.compensations().clone();
        if !report.compensated.is_empty() {
            metrics::counter!(
                "reconcile_compensations_total",
                "operation" => operation.as_str()
            )
            .increment(report.compensated.len() as u64);
            tracing::debug!(
                %operation,
                steps = report.compensated.len(),
                "compensated ledger steps"
            );
        }

        let mut outstanding = report.outstanding;
        if let Err(e) = tx.rollback().await {
            outstanding.push(format!("roll back store transaction: {e}"));
        }
        if outstanding.is_empty() {
            return ReconcileError::Domain(error);
        }

        tracing::error!(%operation, %error, ?outstanding, "compensation incomplete");
        ReconcileError::CompensationFailed {
            operation,
            source: error,
            compensated: report.compensated,
            outstanding,
        }
    }
}

/// Applies sale, payment and inventory changes as single consistent units
/// and records each one in the audit log.
///
/// Operations touching the same sale or item are serialized through a
/// shared [`LockTable`]; operations on unrelated records run concurrently.
pub struct Controller<S, A> {
    store: S,
    audit: A,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
}

impl<S, A> Controller<S, A>
where
    S: Store,
    A: AuditLog,
{
    /// Creates a controller stamping changes with the system clock.
    pub fn new(store: S, audit: A) -> Self {
        Self {
            store,
            audit,
            clock: Arc::new(SystemClock),
            locks: Arc::new(LockTable::new()),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// The lock table, for sharing with a [`ConsistencyAuditor`].
    pub fn locks(&self) -> Arc<LockTable> {
        Arc::clone(&self.locks)
    }

    /// A consistency auditor over the same store, audit log, clock and locks.
    pub fn auditor(&self, actor: impl Into<String>) -> ConsistencyAuditor<S, A>
    where
        S: Clone,
        A: Clone,
    {
        ConsistencyAuditor::new(self.store.clone(), self.audit.clone(), actor)
            .with_shared_clock(Arc::clone(&self.clock))
            .with_locks(self.locks())
    }

    async fn begin(&self, operation: Operation) -> Result<UnitOfWork> {
        UnitOfWork::begin(&self.store, operation, self.clock.now()).await
    }

    /// Locks a sale together with every item its lines refer to, plus
    /// `extra` items.
    ///
    /// The line items are read before locking, so the set is checked again
    /// once the locks are held and the locking retried if an edit changed
    /// it in between.
    async fn lock_sale(&self, sale_id: SaleId, extra: &[ItemId]) -> Result<LockGuard> {
        loop {
            let sale = self
                .store
                .get_sale(sale_id)
                .await?
                .ok_or(DomainError::SaleNotFound(sale_id))?;
            let keys = std::iter::once(LockKey::Sale(sale_id))
                .chain(sale.item_ids().into_iter().map(LockKey::Item))
                .chain(extra.iter().copied().map(LockKey::Item))
                .collect::<Vec<_>>();
            let guard = self.locks.acquire(keys).await;

            let current = self
                .store
                .get_sale(sale_id)
                .await?
                .ok_or(DomainError::SaleNotFound(sale_id))?;
            if current
                .item_ids()
                .into_iter()
                .all(|id| guard.covers(LockKey::Item(id)))
            {
                return Ok(guard);
            }
            tracing::debug!(%sale_id, "sale lines changed while locking, retrying");
        }
    }

    /// Emits metrics, logs the outcome and writes the audit entry.
    async fn finish<T>(
        &self,
        operation: Operation,
        actor: &str,
        targets: Vec<Target>,
        started: Instant,
        result: Result<Applied<T>>,
    ) -> Result<T> {
        metrics::histogram!(
            "reconcile_operation_duration_seconds",
            "operation" => operation.as_str()
        )
        .record(started.elapsed().as_secs_f64());
        let timestamp = self.clock.now();

        match result {
            Ok(applied) => {
                metrics::counter!(
                    "reconcile_operations_total",
                    "operation" => operation.as_str(),
                    "outcome" => "succeeded"
                )
                .increment(1);
                tracing::info!(%operation, actor, "operation succeeded");

                let entry = AuditEntry::builder()
                    .actor(actor)
                    .operation(operation)
                    .outcome(Outcome::Succeeded)
                    .targets(applied.targets)
                    .before_raw(applied.before.into_json())
                    .after_raw(applied.after.into_json())
                    .timestamp(timestamp)
                    .build();
                append_audit(&self.audit, entry).await;
                Ok(applied.value)
            }
            Err(error) => {
                let kind = error.kind();
                metrics::counter!(
                    "reconcile_operations_total",
                    "operation" => operation.as_str(),
                    "outcome" => "failed",
                    "kind" => kind.as_str()
                )
                .increment(1);
                match &error {
                    ReconcileError::CompensationFailed { .. } => {
                        tracing::error!(%operation, actor, %error, "operation failed")
                    }
                    _ => tracing::warn!(%operation, actor, %error, "operation rejected"),
                }

                let current = self.current_state(&targets).await.into_json();
                let mut builder = AuditEntry::builder()
                    .actor(actor)
                    .operation(operation)
                    .outcome(Outcome::failed(&error))
                    .targets(targets)
                    .before_raw(current)
                    .timestamp(timestamp)
                    .metadata("error_kind", json!(kind.as_str()));
                if let ReconcileError::CompensationFailed {
                    compensated,
                    outstanding,
                    ..
                } = &error
                {
                    builder = builder
                        .metadata("compensated", json!(compensated))
                        .metadata("outstanding", json!(outstanding));
                }
                append_audit(&self.audit, builder.build()).await;
                Err(error)
            }
        }
    }

    /// Reads the stored state of the given targets, best effort.
    async fn current_state(&self, targets: &[Target]) -> StateImage {
        let mut image = StateImage::default();
        for target in targets {
            match *target {
                Target::Item(id) => {
                    if let Ok(Some(item)) = self.store.get_item(id).await {
                        image.items.push(item.snapshot());
                    }
                }
                Target::Sale(id) => {
                    if let Ok(Some(sale)) = self.store.get_sale(id).await {
                        image.sales.push(sale.snapshot());
                    }
                }
                Target::Payment(id) => {
                    if let Ok(Some(payment)) = self.store.get_payment(id).await {
                        image.payments.push(payment.snapshot());
                    }
                }
            }
        }
        image
    }

    /// Adds an item to inventory with every unit available.
    #[tracing::instrument(skip(self, cmd), fields(item_id = %cmd.item_id, actor = %cmd.actor))]
    pub async fn register_item(&self, cmd: RegisterItem) -> Result<ItemSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Item(cmd.item_id)];
        let result = self.apply_register_item(&cmd).await;
        self.finish(Operation::RegisterItem, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_register_item(&self, cmd: &RegisterItem) -> Result<Applied<ItemSnapshot>> {
        cmd.validate()?;
        let _guard = self.locks.acquire([cmd.item_id]).await;
        let mut unit = self.begin(Operation::RegisterItem).await?;
        let result = register_item_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Corrects an item's details. A new total quantity goes through the
    /// ledger and is refused if it would not cover the units held or sold.
    #[tracing::instrument(skip(self, cmd), fields(item_id = %cmd.item_id, actor = %cmd.actor))]
    pub async fn update_item(&self, cmd: UpdateItem) -> Result<ItemSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Item(cmd.item_id)];
        let result = self.apply_update_item(&cmd).await;
        self.finish(Operation::UpdateItem, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_update_item(&self, cmd: &UpdateItem) -> Result<Applied<ItemSnapshot>> {
        cmd.validate()?;
        let _guard = self.locks.acquire([cmd.item_id]).await;
        let mut unit = self.begin(Operation::UpdateItem).await?;
        let result = update_item_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Removes an item that no live sale refers to.
    #[tracing::instrument(skip(self, cmd), fields(item_id = %cmd.item_id, actor = %cmd.actor))]
    pub async fn retire_item(&self, cmd: RetireItem) -> Result<()> {
        let started = Instant::now();
        let targets = vec![Target::Item(cmd.item_id)];
        let result = self.apply_retire_item(&cmd).await;
        self.finish(Operation::RetireItem, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_retire_item(&self, cmd: &RetireItem) -> Result<Applied<()>> {
        cmd.validate()?;
        let _guard = self.locks.acquire([cmd.item_id]).await;
        let mut unit = self.begin(Operation::RetireItem).await?;
        let result = retire_item_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Creates an active sale, reserving stock for every line.
    ///
    /// Either every line is reserved and the sale exists, or nothing
    /// changed.
    #[tracing::instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id, actor = %cmd.actor, lines = cmd.sale.lines.len()))]
    pub async fn create_sale(&self, cmd: CreateSale) -> Result<SaleSnapshot> {
        let started = Instant::now();
        let mut targets = vec![Target::Sale(cmd.sale_id)];
        targets.extend(cmd.sale.lines.iter().map(|l| Target::Item(l.item_id)));
        let result = self.apply_create_sale(&cmd).await;
        self.finish(Operation::CreateSale, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_create_sale(&self, cmd: &CreateSale) -> Result<Applied<SaleSnapshot>> {
        cmd.validate()?;
        let _guard = self
            .locks
            .acquire(
                std::iter::once(LockKey::Sale(cmd.sale_id))
                    .chain(cmd.sale.lines.iter().map(|l| LockKey::Item(l.item_id)))
                    .collect::<Vec<_>>(),
            )
            .await;
        let mut unit = self.begin(Operation::CreateSale).await?;
        let result = create_sale_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Replaces the lines and discount of an active, unpaid sale.
    #[tracing::instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id, actor = %cmd.actor))]
    pub async fn edit_sale(&self, cmd: EditSale) -> Result<SaleSnapshot> {
        let started = Instant::now();
        let mut targets = vec![Target::Sale(cmd.sale_id)];
        targets.extend(cmd.lines.iter().map(|l| Target::Item(l.item_id)));
        let result = self.apply_edit_sale(&cmd).await;
        self.finish(Operation::EditSale, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_edit_sale(&self, cmd: &EditSale) -> Result<Applied<SaleSnapshot>> {
        cmd.validate()?;
        let new_items: Vec<ItemId> = cmd.lines.iter().map(|l| l.item_id).collect();
        let _guard = self.lock_sale(cmd.sale_id, &new_items).await?;
        let mut unit = self.begin(Operation::EditSale).await?;
        let result = edit_sale_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Voids an active sale, returning all of its stock to the shelf.
    #[tracing::instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id, actor = %cmd.actor))]
    pub async fn void_sale(&self, cmd: VoidSale) -> Result<SaleSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Sale(cmd.sale_id)];
        let result = self.apply_void_sale(&cmd).await;
        self.finish(Operation::VoidSale, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_void_sale(&self, cmd: &VoidSale) -> Result<Applied<SaleSnapshot>> {
        cmd.validate()?;
        let _guard = self.lock_sale(cmd.sale_id, &[]).await?;
        let mut unit = self.begin(Operation::VoidSale).await?;
        let closing = Closing::Void(cmd.reason.clone());
        let result = close_sale_in(&mut unit, cmd.sale_id, &cmd.actor, closing).await;
        unit.settle(result).await
    }

    /// Deletes an active or voided sale, returning any stock it still holds.
    #[tracing::instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id, actor = %cmd.actor))]
    pub async fn delete_sale(&self, cmd: DeleteSale) -> Result<SaleSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Sale(cmd.sale_id)];
        let result = self.apply_delete_sale(&cmd).await;
        self.finish(Operation::DeleteSale, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_delete_sale(&self, cmd: &DeleteSale) -> Result<Applied<SaleSnapshot>> {
        cmd.validate()?;
        let _guard = self.lock_sale(cmd.sale_id, &[]).await?;
        let mut unit = self.begin(Operation::DeleteSale).await?;
        let result = close_sale_in(&mut unit, cmd.sale_id, &cmd.actor, Closing::Delete).await;
        unit.settle(result).await
    }

    /// Records a pending payment, superseding any earlier pending one.
    #[tracing::instrument(skip(self, cmd), fields(sale_id = %cmd.sale_id, payment_id = %cmd.payment_id, actor = %cmd.actor))]
    pub async fn record_payment(&self, cmd: RecordPayment) -> Result<PaymentSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Sale(cmd.sale_id), Target::Payment(cmd.payment_id)];
        let result = self.apply_record_payment(&cmd).await;
        self.finish(Operation::RecordPayment, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_record_payment(&self, cmd: &RecordPayment) -> Result<Applied<PaymentSnapshot>> {
        cmd.validate()?;
        let _guard = self.locks.acquire([cmd.sale_id]).await;
        let mut unit = self.begin(Operation::RecordPayment).await?;
        let result = record_payment_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Confirms a pending payment and marks the sale's stock as sold.
    ///
    /// Confirming an already confirmed payment fails with
    /// `PaymentNotPending` and changes nothing.
    #[tracing::instrument(skip(self, cmd), fields(payment_id = %cmd.payment_id, actor = %cmd.actor))]
    pub async fn confirm_payment(&self, cmd: ConfirmPayment) -> Result<PaymentSnapshot> {
        let started = Instant::now();
        let mut targets = vec![Target::Payment(cmd.payment_id)];
        if let Ok(Some(payment)) = self.store.get_payment(cmd.payment_id).await {
            targets.push(Target::Sale(payment.sale_id()));
        }
        let result = self.apply_confirm_payment(&cmd).await;
        self.finish(Operation::ConfirmPayment, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_confirm_payment(&self, cmd: &ConfirmPayment) -> Result<Applied<PaymentSnapshot>> {
        cmd.validate()?;
        let sale_id = self.sale_of(cmd.payment_id).await?;
        let _guard = self.lock_sale(sale_id, &[]).await?;
        let mut unit = self.begin(Operation::ConfirmPayment).await?;
        let result = confirm_payment_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    /// Rejects a pending payment. Sale and stock are unchanged.
    #[tracing::instrument(skip(self, cmd), fields(payment_id = %cmd.payment_id, actor = %cmd.actor))]
    pub async fn reject_payment(&self, cmd: RejectPayment) -> Result<PaymentSnapshot> {
        let started = Instant::now();
        let targets = vec![Target::Payment(cmd.payment_id)];
        let result = self.apply_reject_payment(&cmd).await;
        self.finish(Operation::RejectPayment, &cmd.actor, targets, started, result)
            .await
    }

    async fn apply_reject_payment(&self, cmd: &RejectPayment) -> Result<Applied<PaymentSnapshot>> {
        cmd.validate()?;
        let sale_id = self.sale_of(cmd.payment_id).await?;
        let _guard = self.locks.acquire([sale_id]).await;
        let mut unit = self.begin(Operation::RejectPayment).await?;
        let result = reject_payment_in(&mut unit, cmd).await;
        unit.settle(result).await
    }

    async fn sale_of(&self, payment_id: PaymentId) -> Result<SaleId> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or(DomainError::PaymentNotFound(payment_id))?;
        Ok(payment.sale_id())
    }

    pub async fn get_inventory_snapshot(&self, item_id: ItemId) -> Result<ItemSnapshot> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or(DomainError::ItemNotFound(item_id))?;
        Ok(item.snapshot())
    }

    pub async fn get_sale_snapshot(&self, sale_id: SaleId) -> Result<SaleSnapshot> {
        let sale = self
            .store
            .get_sale(sale_id)
            .await?
            .ok_or(DomainError::SaleNotFound(sale_id))?;
        Ok(sale.snapshot())
    }

    pub async fn get_payment_snapshot(&self, payment_id: PaymentId) -> Result<PaymentSnapshot> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or(DomainError::PaymentNotFound(payment_id))?;
        Ok(payment.snapshot())
    }

    /// Every payment recorded against a sale, oldest first.
    pub async fn sale_payments(&self, sale_id: SaleId) -> Result<Vec<PaymentSnapshot>> {
        if self.store.get_sale(sale_id).await?.is_none() {
            return Err(DomainError::SaleNotFound(sale_id).into());
        }
        let payments = self.store.payments_for_sale(sale_id).await?;
        Ok(payments.iter().map(Payment::snapshot).collect())
    }

    /// Payments awaiting confirmation, oldest first.
    pub async fn pending_payments(&self) -> Result<Vec<PaymentSnapshot>> {
        let payments = self.store.payments_with_status(PaymentStatus::Pending).await?;
        Ok(payments.iter().map(Payment::snapshot).collect())
    }

    pub async fn inventory_summary(&self) -> Result<InventorySummary> {
        let items = self.store.list_items().await?;
        Ok(InventorySummary::from_items(&items))
    }

    /// Sales figures for sales created in `[from, to)`.
    pub async fn sales_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SalesReport> {
        if from > to {
            return Err(DomainError::invalid(format!(
                "report range starts at {from} after it ends at {to}"
            ))
            .into());
        }
        let sales = self.store.list_sales().await?;
        let items = self.store.list_items().await?;
        let payments = self.store.list_payments().await?;
        Ok(SalesReport::build(from, to, &sales, &items, &payments))
    }

    /// Audit entries matching `filter`, oldest first.
    pub async fn audit_log(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.query(filter).await?)
    }
}

/// Appends an audit entry. A failed append is logged and counted but does
/// not undo the change, which has already been committed.
pub(crate) async fn append_audit<A: AuditLog>(audit: &A, entry: audit_log::Result<AuditEntry>) {
    let appended = match entry {
        Ok(entry) => audit.append(entry).await,
        Err(e) => Err(e),
    };
    if let Err(e) = appended {
        metrics::counter!("audit_append_failures_total").increment(1);
        tracing::error!(error = %e, "failed to append audit entry");
    }
}

fn not_active(sale: &Sale, action: &'static str) -> DomainError {
    DomainError::SaleNotActive {
        sale_id: sale.id(),
        state: sale.state(),
        action,
    }
}

fn ensure_unpaid(sale: &Sale, payments: &[Payment]) -> domain::Result<()> {
    if payments.iter().any(|p| p.status() == PaymentStatus::Confirmed) {
        return Err(DomainError::SaleAlreadyPaid(sale.id()));
    }
    Ok(())
}

fn snapshots(payments: &[Payment]) -> Vec<PaymentSnapshot> {
    payments.iter().map(Payment::snapshot).collect()
}

async fn register_item_in(
    unit: &mut UnitOfWork,
    cmd: &RegisterItem,
) -> domain::Result<Applied<ItemSnapshot>> {
    if unit.tx.item_for_update(cmd.item_id).await?.is_some() {
        return Err(DomainError::InvalidRequest(format!(
            "item {} already exists",
            cmd.item_id
        )));
    }
    let item = InventoryItem::register(cmd.item_id, cmd.item.clone(), unit.now)?;
    unit.tx.save_item(&item).await?;

    let snapshot = item.snapshot();
    Ok(Applied {
        value: snapshot.clone(),
        targets: vec![Target::Item(cmd.item_id)],
        before: StateImage::default(),
        after: StateImage::items(vec![snapshot]),
    })
}

async fn update_item_in(
    unit: &mut UnitOfWork,
    cmd: &UpdateItem,
) -> domain::Result<Applied<ItemSnapshot>> {
    let mut item = unit
        .tx
        .item_for_update(cmd.item_id)
        .await?
        .ok_or(DomainError::ItemNotFound(cmd.item_id))?;
    let before = StateImage::items(vec![item.snapshot()]);

    item.amend(&cmd.changes, unit.now)?;
    unit.ledger.track(item);
    if let Some(quantity_total) = cmd.changes.quantity_total {
        unit.ledger.resize(cmd.item_id, quantity_total)?;
    }
    let item = unit
        .ledger
        .item(cmd.item_id)
        .cloned()
        .ok_or(DomainError::ItemNotFound(cmd.item_id))?;
    unit.tx.save_item(&item).await?;

    let snapshot = item.snapshot();
    Ok(Applied {
        value: snapshot.clone(),
        targets: vec![Target::Item(cmd.item_id)],
        before,
        after: StateImage::items(vec![snapshot]),
    })
}

async fn retire_item_in(unit: &mut UnitOfWork, cmd: &RetireItem) -> domain::Result<Applied<()>> {
    let item = unit
        .tx
        .item_for_update(cmd.item_id)
        .await?
        .ok_or(DomainError::ItemNotFound(cmd.item_id))?;

    let sales = unit.tx.sales_for_item(cmd.item_id).await?;
    if let Some(sale) = sales.iter().find(|s| s.state() != SaleState::Deleted) {
        return Err(DomainError::ItemInUse {
            item_id: cmd.item_id,
            sale_id: sale.id(),
        });
    }
    if let Some(reservation) = item.reservations().iter().find(|r| r.state.is_active()) {
        return Err(DomainError::ItemInUse {
            item_id: cmd.item_id,
            sale_id: reservation.sale_id,
        });
    }

    unit.tx.delete_item(cmd.item_id).await?;
    Ok(Applied {
        value: (),
        targets: vec![Target::Item(cmd.item_id)],
        before: StateImage::items(vec![item.snapshot()]),
        after: StateImage::default(),
    })
}

async fn create_sale_in(
    unit: &mut UnitOfWork,
    cmd: &CreateSale,
) -> domain::Result<Applied<SaleSnapshot>> {
    if unit.tx.sale_for_update(cmd.sale_id).await?.is_some() {
        return Err(DomainError::InvalidRequest(format!(
            "sale {} already exists",
            cmd.sale_id
        )));
    }
    unit.load_items(cmd.sale.lines.iter().map(|l| l.item_id).collect::<Vec<_>>()).await?;
    let before = StateImage::items(unit.item_snapshots());

    let day = unit.now.date_naive();
    let sequence = unit.tx.next_invoice_sequence(day).await?;
    let sale = Sale::create(
        cmd.sale_id,
        InvoiceNumber::new(day, sequence),
        cmd.actor.as_str(),
        cmd.sale.clone(),
        &mut unit.ledger,
        unit.now,
    )?;

    unit.tx.save_sale(&sale).await?;
    unit.save_items().await?;

    let snapshot = sale.snapshot();
    let mut targets = vec![Target::Sale(sale.id())];
    targets.extend(sale.item_ids().into_iter().map(Target::Item));
    Ok(Applied {
        value: snapshot.clone(),
        targets,
        before,
        after: StateImage {
            items: unit.item_snapshots(),
            sales: vec![snapshot],
            ..StateImage::default()
        },
    })
}

async fn edit_sale_in(
    unit: &mut UnitOfWork,
    cmd: &EditSale,
) -> domain::Result<Applied<SaleSnapshot>> {
    let mut sale = unit.load_sale(cmd.sale_id).await?;
    if !sale.state().can_edit() {
        return Err(not_active(&sale, "edit"));
    }
    let payments = unit.tx.payments_for_sale(sale.id()).await?;
    ensure_unpaid(&sale, &payments)?;

    unit.load_items(sale.item_ids()).await?;
    unit.load_items(cmd.lines.iter().map(|l| l.item_id).collect::<Vec<_>>()).await?;
    let before = StateImage {
        items: unit.item_snapshots(),
        sales: vec![sale.snapshot()],
        ..StateImage::default()
    };

    sale.edit(cmd.lines.clone(), cmd.discount, &mut unit.ledger, unit.now)?;
    unit.tx.save_sale(&sale).await?;
    unit.save_items().await?;

    let snapshot = sale.snapshot();
    let mut targets = vec![Target::Sale(sale.id())];
    targets.extend(unit.ledger.items().map(|item| Target::Item(item.id())));
    Ok(Applied {
        value: snapshot.clone(),
        targets,
        before,
        after: StateImage {
            items: unit.item_snapshots(),
            sales: vec![snapshot],
            ..StateImage::default()
        },
    })
}

/// How a sale is being closed.
enum Closing {
    Void(Option<String>),
    Delete,
}

/// Voids or deletes a sale. Stock goes back to the shelf and pending
/// payments are rejected; both paths share this body so their inventory
/// effect is identical.
async fn close_sale_in(
    unit: &mut UnitOfWork,
    sale_id: SaleId,
    actor: &str,
    closing: Closing,
) -> domain::Result<Applied<SaleSnapshot>> {
    let mut sale = unit.load_sale(sale_id).await?;
    match closing {
        Closing::Void(_) if sale.state() == SaleState::Voided => {
            return Err(DomainError::SaleAlreadyVoided(sale_id));
        }
        Closing::Void(_) if !sale.state().can_void() => return Err(not_active(&sale, "void")),
        Closing::Delete if !sale.state().can_delete() => return Err(not_active(&sale, "delete")),
        _ => {}
    }

    unit.load_items(sale.item_ids()).await?;
    let mut payments = unit.tx.payments_for_sale(sale_id).await?;
    let before = StateImage {
        items: unit.item_snapshots(),
        sales: vec![sale.snapshot()],
        payments: snapshots(&payments),
    };

    let reason = match closing {
        Closing::Void(reason) => {
            sale.void(actor, reason, &mut unit.ledger, unit.now)?;
            VOIDED_REASON
        }
        Closing::Delete => {
            sale.delete(actor, &mut unit.ledger, unit.now)?;
            DELETED_REASON
        }
    };
    unit.reject_pending(&mut payments, actor, reason).await?;
    unit.tx.save_sale(&sale).await?;
    unit.save_items().await?;

    let snapshot = sale.snapshot();
    let mut targets = vec![Target::Sale(sale_id)];
    targets.extend(sale.item_ids().into_iter().map(Target::Item));
    targets.extend(payments.iter().map(|p| Target::Payment(p.id())));
    Ok(Applied {
        value: snapshot.clone(),
        targets,
        before,
        after: StateImage {
            items: unit.item_snapshots(),
            sales: vec![snapshot],
            payments: snapshots(&payments),
        },
    })
}

async fn record_payment_in(
    unit: &mut UnitOfWork,
    cmd: &RecordPayment,
) -> domain::Result<Applied<PaymentSnapshot>> {
    let sale = unit.load_sale(cmd.sale_id).await?;
    if unit.tx.payment_for_update(cmd.payment_id).await?.is_some() {
        return Err(DomainError::InvalidRequest(format!(
            "payment {} already exists",
            cmd.payment_id
        )));
    }
    let payment = Payment::record(
        cmd.payment_id,
        &sale,
        cmd.payment.clone(),
        cmd.actor.as_str(),
        unit.now,
    )?;

    let mut prior = unit.tx.payments_for_sale(sale.id()).await?;
    ensure_unpaid(&sale, &prior)?;
    let before = StateImage {
        sales: vec![sale.snapshot()],
        payments: snapshots(&prior),
        ..StateImage::default()
    };

    let superseded: Vec<PaymentId> = prior
        .iter()
        .filter(|p| p.is_pending())
        .map(Payment::id)
        .collect();
    // The superseded payment is written first so the store never sees two
    // pending payments for one sale.
    unit.reject_pending(&mut prior, &cmd.actor, SUPERSEDED_REASON).await?;
    unit.tx.save_payment(&payment).await?;

    let snapshot = payment.snapshot();
    let mut targets = vec![Target::Sale(sale.id()), Target::Payment(payment.id())];
    targets.extend(superseded.into_iter().map(Target::Payment));
    let mut after = snapshots(&prior);
    after.push(snapshot.clone());
    Ok(Applied {
        value: snapshot,
        targets,
        before,
        after: StateImage {
            sales: vec![sale.snapshot()],
            payments: after,
            ..StateImage::default()
        },
    })
}

async fn confirm_payment_in(
    unit: &mut UnitOfWork,
    cmd: &ConfirmPayment,
) -> domain::Result<Applied<PaymentSnapshot>> {
    let mut payment = unit
        .tx
        .payment_for_update(cmd.payment_id)
        .await?
        .ok_or(DomainError::PaymentNotFound(cmd.payment_id))?;
    let sale = unit.load_sale(payment.sale_id()).await?;

    // Items of a closed sale may already be retired; confirm rejects such
    // sales before touching the ledger.
    if payment.is_pending() && sale.is_active() {
        unit.load_items(sale.item_ids()).await?;
    }
    let before = StateImage {
        items: unit.item_snapshots(),
        sales: vec![sale.snapshot()],
        payments: vec![payment.snapshot()],
    };

    payment.confirm(
        cmd.actor.as_str(),
        cmd.notes.clone(),
        &sale,
        &mut unit.ledger,
        unit.now,
    )?;
    unit.tx.save_payment(&payment).await?;
    unit.save_items().await?;

    let snapshot = payment.snapshot();
    let mut targets = vec![Target::Payment(payment.id()), Target::Sale(sale.id())];
    targets.extend(sale.item_ids().into_iter().map(Target::Item));
    Ok(Applied {
        value: snapshot.clone(),
        targets,
        before,
        after: StateImage {
            items: unit.item_snapshots(),
            sales: vec![sale.snapshot()],
            payments: vec![snapshot],
        },
    })
}

async fn reject_payment_in(
    unit: &mut UnitOfWork,
    cmd: &RejectPayment,
) -> domain::Result<Applied<PaymentSnapshot>> {
    if cmd.reason.trim().is_empty() {
        return Err(DomainError::InvalidRequest(
            "a rejection reason is required".into(),
        ));
    }
    let mut payment = unit
        .tx
        .payment_for_update(cmd.payment_id)
        .await?
        .ok_or(DomainError::PaymentNotFound(cmd.payment_id))?;
    let before = StateImage {
        payments: vec![payment.snapshot()],
        ..StateImage::default()
    };

    payment.reject(cmd.actor.as_str(), cmd.reason.trim(), unit.now)?;
    unit.tx.save_payment(&payment).await?;

    let snapshot = payment.snapshot();
    Ok(Applied {
        value: snapshot.clone(),
        targets: vec![Target::Payment(payment.id()), Target::Sale(payment.sale_id())],
        before,
        after: StateImage {
            payments: vec![snapshot],
            ..StateImage::default()
        },
    })
}
