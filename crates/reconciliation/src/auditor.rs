//! Consistency auditor.
//!
//! Compares every item's reservations and shelf count with what the live
//! sales and their payments imply, and repairs the differences through the
//! [`Ledger`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use audit_log::{AuditEntry, AuditLog, Operation, Outcome, Target};
use common::{Clock, ItemId, Quantity, ReservationId, SaleId, SystemClock};
use domain::{
    DomainError, InventoryItem, ItemSnapshot, Ledger, Payment, PaymentStatus, ReservationState,
    ReservationToken, Sale, Store,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::controller::{StateImage, UnitOfWork, append_audit};
use crate::error::Result;
use crate::locks::LockTable;

/// What is wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The shelf count differs from what the reservations imply.
    StockDrift,
    /// An active reservation no live sale line accounts for.
    OrphanedReservation,
    /// A live sale line whose reservation is absent or released.
    MissingReservation,
    /// A reservation whose quantity, sale or state disagrees with its line.
    ReservationMismatch,
    /// A paid sale whose units are still only held.
    UncommittedSale,
    /// A live sale line refers to an item that does not exist.
    MissingItem,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::StockDrift => "stock_drift",
            ViolationKind::OrphanedReservation => "orphaned_reservation",
            ViolationKind::MissingReservation => "missing_reservation",
            ViolationKind::ReservationMismatch => "reservation_mismatch",
            ViolationKind::UncommittedSale => "uncommitted_sale",
            ViolationKind::MissingItem => "missing_item",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disagreement between an item's ledger state and the sales referring to
/// it. `expected` and `actual` are unit counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub item_id: ItemId,
    pub sale_id: Option<SaleId>,
    pub reservation_id: Option<ReservationId>,
    pub expected: u32,
    pub actual: u32,
}

/// A violation that could not be repaired, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unrepaired {
    pub violation: Violation,
    pub reason: String,
}

/// Outcome of [`ConsistencyAuditor::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub repaired: Vec<Violation>,
    pub unrepaired: Vec<Unrepaired>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.unrepaired.is_empty()
    }
}

/// The reservation a live sale line implies.
#[derive(Debug, Clone)]
struct Expected {
    sale_id: SaleId,
    reservation_id: ReservationId,
    quantity: u32,
    state: ReservationState,
}

/// Groups the reservations implied by active sales by item. Lines of a paid
/// sale are expected to be committed, the rest held.
fn expectations(sales: &[Sale], payments: &[Payment]) -> BTreeMap<ItemId, Vec<Expected>> {
    let paid: HashSet<SaleId> = payments
        .iter()
        .filter(|p| p.status() == PaymentStatus::Confirmed)
        .map(Payment::sale_id)
        .collect();

    let mut expected: BTreeMap<ItemId, Vec<Expected>> = BTreeMap::new();
    for sale in sales.iter().filter(|s| s.is_active()) {
        let state = if paid.contains(&sale.id()) {
            ReservationState::Committed
        } else {
            ReservationState::Held
        };
        for line in sale.line_items() {
            expected.entry(line.item_id).or_default().push(Expected {
                sale_id: sale.id(),
                reservation_id: line.reservation.reservation_id,
                quantity: line.quantity_sold.get(),
                state,
            });
        }
    }
    expected
}

/// Checks one item against the lines that refer to it. Stock drift comes
/// first so a repair recounts the shelf before touching reservations.
fn check_item(item: &InventoryItem, lines: &[Expected]) -> Vec<Violation> {
    let item_id = item.id();
    let mut found = Vec::new();

    let implied = item.expected_available();
    if item.quantity_available() != implied {
        found.push(Violation {
            kind: ViolationKind::StockDrift,
            item_id,
            sale_id: None,
            reservation_id: None,
            expected: implied,
            actual: item.quantity_available(),
        });
    }

    for reservation in item.reservations().iter().filter(|r| r.state.is_active()) {
        if !lines.iter().any(|l| l.reservation_id == reservation.id) {
            found.push(Violation {
                kind: ViolationKind::OrphanedReservation,
                item_id,
                sale_id: Some(reservation.sale_id),
                reservation_id: Some(reservation.id),
                expected: 0,
                actual: reservation.quantity.get(),
            });
        }
    }

    for line in lines {
        let mismatch = match item.reservation(line.reservation_id) {
            Some(r) if r.state.is_active() => {
                if r.sale_id != line.sale_id || r.quantity.get() != line.quantity {
                    Some((ViolationKind::ReservationMismatch, r.quantity.get()))
                } else if r.state == line.state {
                    None
                } else if line.state == ReservationState::Committed {
                    Some((ViolationKind::UncommittedSale, 0))
                } else {
                    // committed without a confirmed payment
                    Some((ViolationKind::ReservationMismatch, r.quantity.get()))
                }
            }
            _ => Some((ViolationKind::MissingReservation, 0)),
        };
        if let Some((kind, actual)) = mismatch {
            found.push(Violation {
                kind,
                item_id,
                sale_id: Some(line.sale_id),
                reservation_id: Some(line.reservation_id),
                expected: line.quantity,
                actual,
            });
        }
    }

    found
}

/// Compares stored items with the sales and payments referring to them.
pub fn check(items: &[InventoryItem], sales: &[Sale], payments: &[Payment]) -> Vec<Violation> {
    let expected = expectations(sales, payments);
    let known: HashSet<ItemId> = items.iter().map(InventoryItem::id).collect();

    let mut violations: Vec<Violation> = items
        .iter()
        .flat_map(|item| {
            let lines = expected.get(&item.id()).map_or(&[][..], Vec::as_slice);
            check_item(item, lines)
        })
        .collect();

    for (item_id, lines) in expected.iter().filter(|(id, _)| !known.contains(id)) {
        violations.extend(lines.iter().map(|line| Violation {
            kind: ViolationKind::MissingItem,
            item_id: *item_id,
            sale_id: Some(line.sale_id),
            reservation_id: Some(line.reservation_id),
            expected: line.quantity,
            actual: 0,
        }));
    }
    violations
}

/// Applies the corrective ledger step for one violation.
fn apply_fix(ledger: &mut Ledger, violation: &Violation, lines: &[Expected]) -> domain::Result<()> {
    let token = |reservation_id| ReservationToken {
        reservation_id,
        item_id: violation.item_id,
    };
    match (violation.kind, violation.reservation_id) {
        (ViolationKind::StockDrift, _) => ledger.recount(violation.item_id).map(drop),
        (ViolationKind::OrphanedReservation, Some(id)) => ledger.release(token(id)).map(drop),
        (ViolationKind::UncommittedSale, Some(id)) => ledger.commit(token(id)).map(drop),
        (ViolationKind::MissingReservation | ViolationKind::ReservationMismatch, Some(id)) => {
            let line = lines
                .iter()
                .find(|l| l.reservation_id == id)
                .ok_or_else(|| {
                    DomainError::InvalidRequest(format!("no sale line expects reservation {id}"))
                })?;
            ledger.reinstate(token(id), line.sale_id, Quantity::new(line.quantity)?, line.state)
        }
        (kind, _) => Err(DomainError::InvalidRequest(format!(
            "{kind} cannot be repaired"
        ))),
    }
}

struct RepairStep {
    violation: Violation,
    before: ItemSnapshot,
    after: ItemSnapshot,
}

#[derive(Default)]
struct ItemRepair {
    steps: Vec<RepairStep>,
    unrepaired: Vec<Unrepaired>,
}

/// Re-checks one locked item inside the transaction and fixes what is still
/// wrong.
async fn repair_in(unit: &mut UnitOfWork, item_id: ItemId) -> domain::Result<ItemRepair> {
    unit.load_items([item_id]).await?;
    let sales = unit.tx.sales_for_item(item_id).await?;
    let mut payments = Vec::new();
    for sale in sales.iter().filter(|s| s.is_active()) {
        payments.extend(unit.tx.payments_for_sale(sale.id()).await?);
    }
    let expected = expectations(&sales, &payments);
    let lines = expected.get(&item_id).map_or(&[][..], Vec::as_slice);

    let snapshot = |ledger: &Ledger| {
        ledger
            .item(item_id)
            .map(InventoryItem::snapshot)
            .ok_or(DomainError::ItemNotFound(item_id))
    };

    let mut repair = ItemRepair::default();
    let found = check_item(
        unit.ledger.item(item_id).ok_or(DomainError::ItemNotFound(item_id))?,
        lines,
    );
    for violation in found {
        let before = snapshot(&unit.ledger)?;
        match apply_fix(&mut unit.ledger, &violation, lines) {
            Ok(()) => repair.steps.push(RepairStep {
                violation,
                before,
                after: snapshot(&unit.ledger)?,
            }),
            Err(e) => repair.unrepaired.push(Unrepaired {
                violation,
                reason: e.to_string(),
            }),
        }
    }

    unit.save_items().await?;
    Ok(repair)
}

/// Scans stored state for ledger inconsistencies and repairs them.
///
/// Scans read without locks, so a scan running next to live operations may
/// report a violation that is gone a moment later. Repairs lock each item and
/// check it again before changing anything.
pub struct ConsistencyAuditor<S, A> {
    store: S,
    audit: A,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
    actor: String,
}

impl<S, A> ConsistencyAuditor<S, A>
where
    S: Store,
    A: AuditLog,
{
    /// Creates an auditor recording repairs under `actor`.
    pub fn new(store: S, audit: A, actor: impl Into<String>) -> Self {
        Self {
            store,
            audit,
            clock: Arc::new(SystemClock),
            locks: Arc::new(LockTable::new()),
            actor: actor.into(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub(crate) fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shares a controller's locks, so repairs and operations on the same
    /// item never interleave.
    pub fn with_locks(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Reports every inconsistency in the store. Changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn scan(&self) -> Result<Vec<Violation>> {
        let items = self.store.list_items().await?;
        let sales = self.store.list_sales().await?;
        let payments = self.store.list_payments().await?;

        let violations = check(&items, &sales, &payments);
        metrics::counter!("consistency_violations_found").increment(violations.len() as u64);
        if violations.is_empty() {
            tracing::info!(items = items.len(), "no inconsistencies found");
        } else {
            tracing::warn!(
                items = items.len(),
                violations = violations.len(),
                "inconsistencies found"
            );
        }
        Ok(violations)
    }

    /// Scans, then repairs each affected item in its own transaction.
    ///
    /// Every applied fix is written to the audit log. Violations that cannot
    /// be fixed, like a sale line whose item no longer exists, are returned
    /// as unrepaired.
    #[tracing::instrument(skip(self), fields(actor = %self.actor))]
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let mut by_item: BTreeMap<ItemId, Vec<Violation>> = BTreeMap::new();
        for violation in self.scan().await? {
            if violation.kind == ViolationKind::MissingItem {
                report.unrepaired.push(Unrepaired {
                    reason: format!("item {} does not exist", violation.item_id),
                    violation,
                });
            } else {
                by_item.entry(violation.item_id).or_default().push(violation);
            }
        }

        for (item_id, scanned) in by_item {
            match self.repair_item(item_id).await {
                Ok(repair) => {
                    for step in repair.steps {
                        self.record_step(&step).await;
                        report.repaired.push(step.violation);
                    }
                    report.unrepaired.extend(repair.unrepaired);
                }
                Err(e) => {
                    tracing::warn!(%item_id, error = %e, "item repair failed");
                    let entry = AuditEntry::builder()
                        .actor(self.actor.as_str())
                        .operation(Operation::RepairInventory)
                        .outcome(Outcome::failed(&e))
                        .target(item_id)
                        .timestamp(self.clock.now())
                        .metadata("error_kind", json!(e.kind().as_str()))
                        .metadata("violations", to_json(&scanned))
                        .build();
                    append_audit(&self.audit, entry).await;
                    let reason = e.to_string();
                    report
                        .unrepaired
                        .extend(scanned.into_iter().map(|violation| Unrepaired {
                            violation,
                            reason: reason.clone(),
                        }));
                }
            }
        }

        metrics::counter!("consistency_repairs_applied").increment(report.repaired.len() as u64);
        tracing::info!(
            repaired = report.repaired.len(),
            unrepaired = report.unrepaired.len(),
            "repair finished"
        );
        Ok(report)
    }

    async fn repair_item(&self, item_id: ItemId) -> Result<ItemRepair> {
        let _guard = self.locks.acquire([item_id]).await;
        let mut unit =
            UnitOfWork::begin(&self.store, Operation::RepairInventory, self.clock.now()).await?;
        let result = repair_in(&mut unit, item_id).await;
        unit.settle(result).await
    }

    async fn record_step(&self, step: &RepairStep) {
        let violation = &step.violation;
        tracing::info!(
            item_id = %violation.item_id,
            kind = %violation.kind,
            expected = violation.expected,
            actual = violation.actual,
            "repaired"
        );
        let entry = AuditEntry::builder()
            .actor(self.actor.as_str())
            .operation(Operation::RepairInventory)
            .outcome(Outcome::Succeeded)
            .target(violation.item_id)
            .targets(violation.sale_id.map(Target::Sale))
            .before_raw(StateImage::items(vec![step.before.clone()]).into_json())
            .after_raw(StateImage::items(vec![step.after.clone()]).into_json())
            .timestamp(self.clock.now())
            .metadata("violation", to_json(violation))
            .build();
        append_audit(&self.audit, entry).await;
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use common::{Discount, Money, PaymentId};
    use domain::{InvoiceNumber, NewItem, NewPayment, NewSale, PaymentMethod, SaleLine};

    use super::*;

    fn item(units: u32) -> InventoryItem {
        InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "Oak armchair".into(),
                source_location: None,
                quantity: Quantity::new(units).unwrap(),
                unit_cost: Money::from_dollars(40),
                unit_price: Money::from_dollars(120),
            },
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn sell(item: InventoryItem, units: u32) -> (InventoryItem, Sale) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();
        let item_id = item.id();
        let mut ledger = Ledger::new([item], now);
        let sale = Sale::create(
            SaleId::new(),
            InvoiceNumber::new(now.date_naive(), 1),
            "clerk",
            NewSale {
                lines: vec![SaleLine::new(item_id, Quantity::new(units).unwrap())],
                discount: Discount::none(),
                ..Default::default()
            },
            &mut ledger,
            now,
        )
        .unwrap();
        (ledger.item(item_id).unwrap().clone(), sale)
    }

    #[test]
    fn consistent_sale_has_no_violations() {
        let (item, sale) = sell(item(5), 3);
        assert!(check(&[item], &[sale], &[]).is_empty());
    }

    #[test]
    fn drift_and_orphans_are_reported() {
        let (item, _forgotten) = sell(item(5), 3);
        let mut drifted = item.snapshot();
        drifted.quantity_available = 4;

        let violations = check(&[InventoryItem::from(drifted)], &[], &[]);
        let kinds: Vec<ViolationKind> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![ViolationKind::StockDrift, ViolationKind::OrphanedReservation]
        );
        assert_eq!((violations[0].expected, violations[0].actual), (2, 4));
        assert_eq!((violations[1].expected, violations[1].actual), (0, 3));
    }

    #[test]
    fn paid_sale_with_held_units_is_uncommitted() {
        let (item, sale) = sell(item(2), 1);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut payment = Payment::record(
            PaymentId::new(),
            &sale,
            NewPayment {
                method: PaymentMethod::Card,
                amount: sale.final_total(),
                received_by: None,
                notes: None,
            },
            "clerk",
            now,
        )
        .unwrap();
        // Confirm against a throwaway ledger so the stored item stays held.
        let mut scratch = Ledger::new([item.clone()], now);
        payment
            .confirm("owner", None, &sale, &mut scratch, now)
            .unwrap();

        let violations = check(&[item], &[sale], &[payment]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::UncommittedSale);
    }

    #[test]
    fn line_without_item_is_missing_item() {
        let (_, sale) = sell(item(1), 1);
        let violations = check(&[], &[sale], &[]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::MissingItem);
        assert_eq!(violations[0].expected, 1);
    }

    #[test]
    fn fixes_leave_the_item_consistent() {
        let (item, sale) = sell(item(5), 2);
        let mut broken = item.snapshot();
        broken.reservations.clear();
        broken.quantity_available = 1;
        let broken = InventoryItem::from(broken);
        let item_id = broken.id();

        let lines = expectations(std::slice::from_ref(&sale), &[]);
        let lines = lines.get(&item_id).unwrap();
        let found = check_item(&broken, lines);
        assert_eq!(found[0].kind, ViolationKind::StockDrift);
        assert_eq!(found[1].kind, ViolationKind::MissingReservation);

        let mut ledger = Ledger::new([broken], Utc::now());
        for violation in &found {
            apply_fix(&mut ledger, violation, lines).unwrap();
        }
        let repaired = ledger.item(item_id).unwrap();
        assert!(check_item(repaired, lines).is_empty());
        assert_eq!(repaired.quantity_available(), 3);
    }
}
