//! Integration tests for the consistency auditor: corrupt stored state behind
//! the controller's back, then scan and repair it.

use audit_log::{AuditFilter, AuditLogExt, InMemoryAuditLog, Operation, Target};
use chrono::{TimeZone, Utc};
use common::{FixedClock, ItemId, Money, Quantity, SaleId};
use domain::{
    ConfirmPayment, CreateSale, InMemoryStore, InventoryItem, InvoiceNumber, ItemSnapshot,
    ItemStatus, Ledger, NewItem, NewPayment, NewSale, PaymentMethod, RecordPayment, RegisterItem,
    ReservationState, Sale, SaleLine, SaleSnapshot, SaleState, Store, StoreTx,
};
use reconciliation::{ConsistencyAuditor, Controller, ViolationKind};

type TestController = Controller<InMemoryStore, InMemoryAuditLog>;

struct TestHarness {
    controller: TestController,
    auditor: ConsistencyAuditor<InMemoryStore, InMemoryAuditLog>,
    store: InMemoryStore,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let audit = InMemoryAuditLog::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 4, 8, 0, 0).unwrap());
        let controller = Controller::new(store.clone(), audit).with_clock(clock);
        let auditor = controller.auditor("nightly_audit");

        Self {
            controller,
            auditor,
            store,
        }
    }

    async fn register(&self, units: u32) -> ItemId {
        let cmd = RegisterItem::new(
            "intake",
            NewItem {
                description: "Maple dresser".into(),
                source_location: None,
                quantity: Quantity::new(units).unwrap(),
                unit_cost: Money::from_dollars(50),
                unit_price: Money::from_dollars(150),
            },
        );
        self.controller.register_item(cmd).await.unwrap().id
    }

    async fn sell(&self, item: ItemId, units: u32) -> SaleSnapshot {
        self.controller
            .create_sale(CreateSale::new(
                "clerk",
                vec![SaleLine::new(item, Quantity::new(units).unwrap())],
            ))
            .await
            .unwrap()
    }

    async fn item(&self, id: ItemId) -> ItemSnapshot {
        self.controller.get_inventory_snapshot(id).await.unwrap()
    }

    /// Writes an item straight to the store.
    async fn overwrite_item(&self, snapshot: ItemSnapshot) {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_item(&InventoryItem::from(snapshot)).await.unwrap();
        tx.commit().await.unwrap();
    }

    /// Writes a sale straight to the store.
    async fn overwrite_sale(&self, sale: &Sale) {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_sale(sale).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn repairs(&self) -> Vec<audit_log::AuditEntry> {
        self.controller
            .audit_log(AuditFilter::for_operation(Operation::RepairInventory))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_clean_store_has_no_violations() {
    let h = TestHarness::new();
    let item = h.register(4).await;
    let sale = h.sell(item, 2).await;
    let payment = h
        .controller
        .record_payment(RecordPayment::new(
            "clerk",
            sale.id,
            NewPayment {
                method: PaymentMethod::Zelle,
                amount: sale.final_total,
                received_by: None,
                notes: None,
            },
        ))
        .await
        .unwrap();
    h.controller
        .confirm_payment(ConfirmPayment::new("owner", payment.id))
        .await
        .unwrap();
    h.sell(item, 1).await;

    assert!(h.auditor.scan().await.unwrap().is_empty());
    let report = h.auditor.repair().await.unwrap();
    assert!(report.repaired.is_empty());
    assert!(report.is_clean());
    assert!(h.repairs().await.is_empty());
}

#[tokio::test]
async fn test_drift_is_recounted() {
    let h = TestHarness::new();
    let item = h.register(5).await;
    h.sell(item, 2).await;

    let mut drifted = h.item(item).await;
    drifted.quantity_available = 1;
    h.overwrite_item(drifted).await;

    let violations = h.auditor.scan().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::StockDrift);
    assert_eq!((violations[0].expected, violations[0].actual), (3, 1));

    let report = h.auditor.repair().await.unwrap();
    assert_eq!(report.repaired.len(), 1);
    assert!(report.is_clean());
    assert_eq!(h.item(item).await.quantity_available, 3);
    assert!(h.auditor.scan().await.unwrap().is_empty());

    let entries = h.repairs().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor, "nightly_audit");
    assert!(entries[0].touches(Target::Item(item)));
    assert_eq!(entries[0].before["items"][0]["quantity_available"], 1);
    assert_eq!(entries[0].after["items"][0]["quantity_available"], 3);
    assert_eq!(entries[0].metadata["violation"]["kind"], "stock_drift");
}

#[tokio::test]
async fn test_lost_reservation_is_reinstated() {
    let h = TestHarness::new();
    let item = h.register(5).await;
    let sale = h.sell(item, 2).await;

    let mut broken = h.item(item).await;
    broken.reservations.clear();
    h.overwrite_item(broken).await;

    let kinds: Vec<ViolationKind> = h
        .auditor
        .scan()
        .await
        .unwrap()
        .iter()
        .map(|v| v.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ViolationKind::StockDrift, ViolationKind::MissingReservation]
    );

    let report = h.auditor.repair().await.unwrap();
    assert_eq!(report.repaired.len(), 2);
    let repaired = h.item(item).await;
    assert_eq!(repaired.quantity_available, 3);
    assert_eq!(repaired.quantity_held, 2);
    assert_eq!(repaired.reservations[0].sale_id, sale.id);
    assert!(h.auditor.scan().await.unwrap().is_empty());
    assert_eq!(h.repairs().await.len(), 2);
}

#[tokio::test]
async fn test_paid_sale_is_committed() {
    let h = TestHarness::new();
    let item = h.register(3).await;
    let sale = h.sell(item, 3).await;
    let payment = h
        .controller
        .record_payment(RecordPayment::new(
            "clerk",
            sale.id,
            NewPayment {
                method: PaymentMethod::Card,
                amount: sale.final_total,
                received_by: None,
                notes: None,
            },
        ))
        .await
        .unwrap();
    h.controller
        .confirm_payment(ConfirmPayment::new("owner", payment.id))
        .await
        .unwrap();

    let mut broken = h.item(item).await;
    broken.reservations[0].state = ReservationState::Held;
    h.overwrite_item(broken).await;

    let violations = h.auditor.scan().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::UncommittedSale);
    assert_eq!(violations[0].sale_id, Some(sale.id));

    h.auditor.repair().await.unwrap();
    let repaired = h.item(item).await;
    assert_eq!(repaired.quantity_committed, 3);
    assert_eq!(repaired.quantity_held, 0);
    assert_eq!(repaired.quantity_available, 0);
}

#[tokio::test]
async fn test_orphaned_hold_is_released() {
    let h = TestHarness::new();
    let item = h.register(4).await;
    let sale = h.sell(item, 3).await;

    // The sale was closed but its stock never came back.
    let mut closed: SaleSnapshot = h.controller.get_sale_snapshot(sale.id).await.unwrap();
    closed.state = SaleState::Deleted;
    h.overwrite_sale(&Sale::from(closed)).await;

    let violations = h.auditor.scan().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::OrphanedReservation);
    assert_eq!(violations[0].actual, 3);

    let report = h.auditor.repair().await.unwrap();
    assert_eq!(report.repaired.len(), 1);
    let repaired = h.item(item).await;
    assert_eq!(repaired.quantity_available, 4);
    assert_eq!(repaired.reservations[0].state, ReservationState::Released);
    let latest = h
        .controller
        .audit()
        .latest(AuditFilter::for_operation(Operation::RepairInventory))
        .await
        .unwrap()
        .unwrap();
    assert!(latest.touches(Target::Sale(sale.id)));
}

#[tokio::test]
async fn test_unfixable_violations_are_reported() {
    let h = TestHarness::new();
    let now = Utc.with_ymd_and_hms(2024, 6, 4, 8, 0, 0).unwrap();

    // A sale for an item that was never stored.
    let ghost = InventoryItem::register(
        ItemId::new(),
        NewItem {
            description: "Ghost".into(),
            source_location: None,
            quantity: Quantity::new(1).unwrap(),
            unit_cost: Money::zero(),
            unit_price: Money::from_dollars(5),
        },
        now,
    )
    .unwrap();
    let ghost_id = ghost.id();
    let mut ledger = Ledger::new([ghost], now);
    let orphan_sale = Sale::create(
        SaleId::new(),
        InvoiceNumber::new(now.date_naive(), 90),
        "clerk",
        NewSale {
            lines: vec![SaleLine::new(ghost_id, Quantity::new(1).unwrap())],
            ..Default::default()
        },
        &mut ledger,
        now,
    )
    .unwrap();
    h.overwrite_sale(&orphan_sale).await;

    // A sale whose units went to another sale in the meantime.
    let item = h.register(2).await;
    let stored = InventoryItem::from(h.item(item).await);
    let mut ledger = Ledger::new([stored], now);
    let lost_sale = Sale::create(
        SaleId::new(),
        InvoiceNumber::new(now.date_naive(), 91),
        "clerk",
        NewSale {
            lines: vec![SaleLine::new(item, Quantity::new(2).unwrap())],
            ..Default::default()
        },
        &mut ledger,
        now,
    )
    .unwrap();
    h.overwrite_sale(&lost_sale).await;
    h.sell(item, 2).await;

    let report = h.auditor.repair().await.unwrap();
    assert!(!report.is_clean());
    assert!(report.repaired.is_empty());
    assert_eq!(report.unrepaired.len(), 2);

    let missing = report
        .unrepaired
        .iter()
        .find(|u| u.violation.kind == ViolationKind::MissingItem)
        .unwrap();
    assert_eq!(missing.violation.item_id, ghost_id);

    let short = report
        .unrepaired
        .iter()
        .find(|u| u.violation.kind == ViolationKind::MissingReservation)
        .unwrap();
    assert_eq!(short.violation.sale_id, Some(lost_sale.id()));
    assert!(short.reason.contains("Insufficient stock"));
    assert_eq!(h.item(item).await.quantity_available, 0);
}

#[tokio::test]
async fn test_single_unit_items_follow_status_rules() {
    let h = TestHarness::new();

    // Sold, but the only sale that bought it is gone.
    let sold = h.register(1).await;
    let sale = h.sell(sold, 1).await;
    let payment = h
        .controller
        .record_payment(RecordPayment::new(
            "clerk",
            sale.id,
            NewPayment {
                method: PaymentMethod::Cash,
                amount: sale.final_total,
                received_by: None,
                notes: None,
            },
        ))
        .await
        .unwrap();
    h.controller
        .confirm_payment(ConfirmPayment::new("owner", payment.id))
        .await
        .unwrap();
    assert_eq!(h.item(sold).await.status, ItemStatus::Sold);
    let mut closed = h.controller.get_sale_snapshot(sale.id).await.unwrap();
    closed.state = SaleState::Deleted;
    h.overwrite_sale(&Sale::from(closed)).await;

    // Available, yet an active sale still lists it.
    let shelved = h.register(1).await;
    let pending = h.sell(shelved, 1).await;
    let mut reopened = h.item(shelved).await;
    reopened.reservations.clear();
    reopened.quantity_available = 1;
    h.overwrite_item(reopened).await;

    let violations = h.auditor.scan().await.unwrap();
    assert_eq!(violations.len(), 2);
    let orphan = violations.iter().find(|v| v.item_id == sold).unwrap();
    assert_eq!(orphan.kind, ViolationKind::OrphanedReservation);
    assert_eq!(orphan.sale_id, Some(sale.id));
    let missing = violations.iter().find(|v| v.item_id == shelved).unwrap();
    assert_eq!(missing.kind, ViolationKind::MissingReservation);
    assert_eq!(missing.sale_id, Some(pending.id));

    let report = h.auditor.repair().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(h.item(sold).await.status, ItemStatus::Available);
    let restored = h.item(shelved).await;
    assert_eq!(restored.status, ItemStatus::Pending);
    assert_eq!(restored.reservations[0].sale_id, pending.id);
    assert!(h.auditor.scan().await.unwrap().is_empty());
}
