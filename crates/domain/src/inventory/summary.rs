use common::Money;
use serde::{Deserialize, Serialize};

use super::{InventoryItem, ItemStatus};

/// Stock figures across every inventory item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub items: usize,
    pub available_items: usize,
    pub pending_items: usize,
    pub sold_items: usize,
    pub total_units: u64,
    pub available_units: u64,
    /// Unit cost times total quantity, summed.
    pub total_investment: Money,
    /// Unit price times available quantity, summed.
    pub available_retail_value: Money,
}

impl InventorySummary {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a InventoryItem>) -> Self {
        items.into_iter().fold(Self::default(), |mut summary, item| {
            summary.items += 1;
            match item.status() {
                ItemStatus::Available => summary.available_items += 1,
                ItemStatus::Pending => summary.pending_items += 1,
                ItemStatus::Sold => summary.sold_items += 1,
            }
            summary.total_units += u64::from(item.quantity_total());
            summary.available_units += u64::from(item.quantity_available());
            summary.total_investment = summary
                .total_investment
                .saturating_add(item.unit_cost().multiply(item.quantity_total()));
            summary.available_retail_value = summary
                .available_retail_value
                .saturating_add(item.unit_price().multiply(item.quantity_available()));
            summary
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{ItemId, Quantity, ReservationId, SaleId};

    use super::*;
    use crate::inventory::NewItem;

    #[test]
    fn summarises_stock() {
        let new = |units: u32| NewItem {
            description: "Chair".into(),
            source_location: None,
            quantity: Quantity::new(units).unwrap(),
            unit_cost: Money::from_dollars(10),
            unit_price: Money::from_dollars(30),
        };
        let now = Utc::now();
        let free = InventoryItem::register(ItemId::new(), new(4), now).unwrap();
        let mut held = InventoryItem::register(ItemId::new(), new(1), now).unwrap();
        held.hold(ReservationId::new(), SaleId::new(), Quantity::new(1).unwrap(), now)
            .unwrap();

        let summary = InventorySummary::from_items([&free, &held]);
        assert_eq!(summary.items, 2);
        assert_eq!(summary.available_items, 1);
        assert_eq!(summary.pending_items, 1);
        assert_eq!(summary.sold_items, 0);
        assert_eq!(summary.total_units, 5);
        assert_eq!(summary.available_units, 4);
        assert_eq!(summary.total_investment, Money::from_dollars(50));
        assert_eq!(summary.available_retail_value, Money::from_dollars(120));
    }
}
