use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ItemId, Money, SaleId};
use serde::{Deserialize, Serialize};

use super::{Sale, SaleState};
use crate::inventory::InventoryItem;
use crate::payment::{Payment, PaymentStatus};

/// Sales figures for sales created in `[from, to)`.
///
/// Only active sales count towards the totals; voided and deleted sales are
/// only counted. Totals saturate rather than wrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub sales: usize,
    /// Voided or deleted sales.
    pub closed_sales: usize,
    pub units_sold: u64,
    /// Final totals of the active sales, summed.
    pub sales_total: Money,
    /// Current unit cost times quantity sold, over lines whose item still
    /// exists.
    pub cost_of_goods: Money,
    pub gross_profit: Money,
    /// Lines left out of `cost_of_goods` because their item was retired.
    pub lines_without_cost: usize,
    /// Active sales with a confirmed payment.
    pub paid_sales: usize,
    pub paid_total: Money,
    /// Payments awaiting confirmation on the reported sales.
    pub pending_payments: usize,
    pub pending_amount: Money,
}

impl SalesReport {
    pub fn build<'a>(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sales: impl IntoIterator<Item = &'a Sale>,
        items: impl IntoIterator<Item = &'a InventoryItem>,
        payments: impl IntoIterator<Item = &'a Payment>,
    ) -> Self {
        let costs: HashMap<ItemId, Money> = items
            .into_iter()
            .map(|item| (item.id(), item.unit_cost()))
            .collect();
        let mut by_sale: HashMap<SaleId, Vec<&Payment>> = HashMap::new();
        for payment in payments {
            by_sale.entry(payment.sale_id()).or_default().push(payment);
        }

        let mut report = Self {
            from,
            to,
            sales: 0,
            closed_sales: 0,
            units_sold: 0,
            sales_total: Money::zero(),
            cost_of_goods: Money::zero(),
            gross_profit: Money::zero(),
            lines_without_cost: 0,
            paid_sales: 0,
            paid_total: Money::zero(),
            pending_payments: 0,
            pending_amount: Money::zero(),
        };

        let in_range = |sale: &&Sale| sale.created_at() >= from && sale.created_at() < to;
        for sale in sales.into_iter().filter(in_range) {
            match sale.state() {
                SaleState::Active => {}
                SaleState::Voided | SaleState::Deleted => {
                    report.closed_sales += 1;
                    continue;
                }
                SaleState::Draft => continue,
            }

            report.sales += 1;
            report.sales_total = report.sales_total.saturating_add(sale.final_total());
            for line in sale.line_items() {
                report.units_sold += u64::from(line.quantity_sold.get());
                match costs.get(&line.item_id) {
                    Some(cost) => {
                        report.cost_of_goods = report
                            .cost_of_goods
                            .saturating_add(cost.multiply(line.quantity_sold.get()));
                    }
                    None => report.lines_without_cost += 1,
                }
            }

            let payments = by_sale.get(&sale.id()).map(Vec::as_slice).unwrap_or_default();
            if let Some(paid) = payments
                .iter()
                .find(|p| p.status() == PaymentStatus::Confirmed)
            {
                report.paid_sales += 1;
                report.paid_total = report.paid_total.saturating_add(paid.amount());
            }
            for pending in payments.iter().filter(|p| p.is_pending()) {
                report.pending_payments += 1;
                report.pending_amount = report.pending_amount.saturating_add(pending.amount());
            }
        }

        report.gross_profit = report.sales_total.saturating_sub(report.cost_of_goods);
        report
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use common::{PaymentId, Quantity};

    use super::*;
    use crate::inventory::{Ledger, NewItem};
    use crate::payment::{NewPayment, PaymentMethod};
    use crate::sale::{InvoiceNumber, NewSale, SaleLine};

    fn item(cost: i64, price: i64, at: DateTime<Utc>) -> InventoryItem {
        InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "Rocking chair".into(),
                source_location: None,
                quantity: Quantity::new(5).unwrap(),
                unit_cost: Money::from_dollars(cost),
                unit_price: Money::from_dollars(price),
            },
            at,
        )
        .unwrap()
    }

    fn sell(ledger: &mut Ledger, item: ItemId, units: u32, at: DateTime<Utc>) -> Sale {
        Sale::create(
            SaleId::new(),
            InvoiceNumber::new(at.date_naive(), 1),
            "clerk",
            NewSale {
                lines: vec![SaleLine::new(item, Quantity::new(units).unwrap())],
                ..Default::default()
            },
            ledger,
            at,
        )
        .unwrap()
    }

    fn pay(sale: &Sale, at: DateTime<Utc>) -> Payment {
        let payment = NewPayment {
            method: PaymentMethod::Cash,
            amount: sale.final_total(),
            received_by: None,
            notes: None,
        };
        Payment::record(PaymentId::new(), sale, payment, "clerk", at).unwrap()
    }

    #[test]
    fn reports_active_sales_in_range() {
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let to = from + Duration::days(1);
        let noon = from + Duration::hours(12);

        let chair = item(10, 30, from);
        let desk = item(20, 50, from);
        let (chair_id, desk_id) = (chair.id(), desk.id());
        let mut ledger = Ledger::new([chair, desk], from);

        let paid = sell(&mut ledger, chair_id, 2, noon);
        let mut confirmed = pay(&paid, noon);
        confirmed.confirm("owner", None, &paid, &mut ledger, noon).unwrap();

        let unpaid = sell(&mut ledger, desk_id, 1, noon);
        let pending = pay(&unpaid, noon);

        let mut voided = sell(&mut ledger, desk_id, 1, noon);
        voided.void("owner", None, &mut ledger, noon).unwrap();

        let earlier = sell(&mut ledger, chair_id, 1, from - Duration::hours(1));
        let boundary = sell(&mut ledger, chair_id, 1, to);

        let items: Vec<InventoryItem> = ledger.items().cloned().collect();
        let report = SalesReport::build(
            from,
            to,
            [&paid, &unpaid, &voided, &earlier, &boundary],
            &items,
            [&confirmed, &pending],
        );

        assert_eq!(report.sales, 2);
        assert_eq!(report.closed_sales, 1);
        assert_eq!(report.units_sold, 3);
        assert_eq!(report.sales_total, Money::from_dollars(110));
        assert_eq!(report.cost_of_goods, Money::from_dollars(40));
        assert_eq!(report.gross_profit, Money::from_dollars(70));
        assert_eq!(report.lines_without_cost, 0);
        assert_eq!(report.paid_sales, 1);
        assert_eq!(report.paid_total, Money::from_dollars(60));
        assert_eq!(report.pending_payments, 1);
        assert_eq!(report.pending_amount, Money::from_dollars(50));
    }

    #[test]
    fn lines_of_retired_items_have_no_cost() {
        let from = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let gone = item(10, 30, from);
        let gone_id = gone.id();
        let mut ledger = Ledger::new([gone], from);
        let sale = sell(&mut ledger, gone_id, 1, from);

        let report = SalesReport::build(from, from + Duration::days(1), [&sale], [], []);
        assert_eq!(report.sales_total, Money::from_dollars(30));
        assert_eq!(report.cost_of_goods, Money::zero());
        assert_eq!(report.gross_profit, Money::from_dollars(30));
        assert_eq!(report.lines_without_cost, 1);
    }
}
