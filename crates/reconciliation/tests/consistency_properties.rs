//! Property tests: any sequence of controller operations, accepted or
//! refused, leaves the store consistent.

use audit_log::InMemoryAuditLog;
use common::{Discount, ItemId, Money, PaymentId, Quantity, SaleId};
use domain::{
    ConfirmPayment, CreateSale, DeleteSale, EditSale, InMemoryStore, NewItem, NewPayment,
    PaymentMethod, RecordPayment, RegisterItem, RejectPayment, SaleLine, Store, VoidSale,
};
use proptest::prelude::*;
use reconciliation::{Controller, check};

#[derive(Debug, Clone)]
enum Op {
    Create { item: usize, units: u32 },
    Edit { sale: usize, item: usize, units: u32 },
    Void(usize),
    Delete(usize),
    Record(usize),
    Confirm(usize),
    Reject(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..3, 1u32..4).prop_map(|(item, units)| Op::Create { item, units }),
        2 => (0usize..8, 0usize..3, 1u32..4)
            .prop_map(|(sale, item, units)| Op::Edit { sale, item, units }),
        1 => (0usize..8).prop_map(Op::Void),
        1 => (0usize..8).prop_map(Op::Delete),
        2 => (0usize..8).prop_map(Op::Record),
        2 => (0usize..8).prop_map(Op::Confirm),
        1 => (0usize..8).prop_map(Op::Reject),
    ]
}

fn pick<T: Copy>(list: &[T], index: usize) -> Option<T> {
    (!list.is_empty()).then(|| list[index % list.len()])
}

fn units(n: u32) -> Quantity {
    Quantity::new(n).unwrap()
}

/// Applies the operations, ignoring refusals, and returns the violations the
/// auditor finds afterwards along with the stored unit totals per item.
async fn run(ops: Vec<Op>) -> (usize, Vec<(u32, u32)>) {
    let store = InMemoryStore::new();
    let controller = Controller::new(store.clone(), InMemoryAuditLog::new());

    let mut items: Vec<ItemId> = Vec::new();
    for total in [3, 4, 5] {
        let item = controller
            .register_item(RegisterItem::new(
                "intake",
                NewItem {
                    description: "Pine bookshelf".into(),
                    source_location: None,
                    quantity: units(total),
                    unit_cost: Money::from_dollars(20),
                    unit_price: Money::from_dollars(60),
                },
            ))
            .await
            .unwrap();
        items.push(item.id);
    }

    let mut sales: Vec<SaleId> = Vec::new();
    let mut payments: Vec<PaymentId> = Vec::new();
    for op in ops {
        match op {
            Op::Create { item, units: n } => {
                let lines = vec![SaleLine::new(items[item], units(n))];
                if let Ok(sale) = controller.create_sale(CreateSale::new("clerk", lines)).await {
                    sales.push(sale.id);
                }
            }
            Op::Edit { sale, item, units: n } => {
                if let Some(sale_id) = pick(&sales, sale) {
                    let lines = vec![SaleLine::new(items[item], units(n))];
                    let _ = controller
                        .edit_sale(EditSale::new("clerk", sale_id, lines, Discount::none()))
                        .await;
                }
            }
            Op::Void(sale) => {
                if let Some(sale_id) = pick(&sales, sale) {
                    let _ = controller.void_sale(VoidSale::new("owner", sale_id)).await;
                }
            }
            Op::Delete(sale) => {
                if let Some(sale_id) = pick(&sales, sale) {
                    let _ = controller.delete_sale(DeleteSale::new("owner", sale_id)).await;
                }
            }
            Op::Record(sale) => {
                if let Some(sale_id) = pick(&sales, sale) {
                    let payment = NewPayment {
                        method: PaymentMethod::Cash,
                        amount: Money::from_dollars(60),
                        received_by: None,
                        notes: None,
                    };
                    if let Ok(p) = controller
                        .record_payment(RecordPayment::new("clerk", sale_id, payment))
                        .await
                    {
                        payments.push(p.id);
                    }
                }
            }
            Op::Confirm(payment) => {
                if let Some(payment_id) = pick(&payments, payment) {
                    let _ = controller
                        .confirm_payment(ConfirmPayment::new("owner", payment_id))
                        .await;
                }
            }
            Op::Reject(payment) => {
                if let Some(payment_id) = pick(&payments, payment) {
                    let _ = controller
                        .reject_payment(RejectPayment::new("owner", payment_id, "bounced"))
                        .await;
                }
            }
        }
    }

    let violations = controller.auditor("auditor").scan().await.unwrap();
    let mut totals = Vec::new();
    for id in items {
        let item = controller.get_inventory_snapshot(id).await.unwrap();
        totals.push((
            item.quantity_available + item.quantity_held + item.quantity_committed,
            item.quantity_total,
        ));
    }
    (violations.len(), totals)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    })]

    /// Property: the auditor finds nothing to repair after any sequence of
    /// operations, and every item still accounts for all of its units.
    #[test]
    fn operations_keep_store_consistent(ops in prop::collection::vec(op(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (violations, totals) = runtime.block_on(run(ops));

        prop_assert_eq!(violations, 0);
        for (accounted, total) in totals {
            prop_assert_eq!(accounted, total);
        }
    }
}

#[tokio::test]
async fn test_check_agrees_with_scan() {
    let store = InMemoryStore::new();
    let controller = Controller::new(store.clone(), InMemoryAuditLog::new());
    let item = controller
        .register_item(RegisterItem::new(
            "intake",
            NewItem {
                description: "Pine bookshelf".into(),
                source_location: None,
                quantity: units(2),
                unit_cost: Money::from_dollars(20),
                unit_price: Money::from_dollars(60),
            },
        ))
        .await
        .unwrap();
    controller
        .create_sale(CreateSale::new("clerk", vec![SaleLine::new(item.id, units(1))]))
        .await
        .unwrap();

    let items = store.list_items().await.unwrap();
    let sales = store.list_sales().await.unwrap();
    let payments = store.list_payments().await.unwrap();
    assert!(check(&items, &sales, &payments).is_empty());
}
