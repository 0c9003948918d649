//! Sale aggregate implementation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::{Discount, ItemId, Money, Quantity, SaleId};
use serde::{Deserialize, Serialize};

use super::{InvoiceNumber, SaleState};
use crate::error::{DomainError, Result};
use crate::inventory::{Ledger, ReservationToken};

/// A requested sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub item_id: ItemId,
    pub quantity: Quantity,
    /// Price per unit. Defaults to the item's listed price.
    pub unit_price: Option<Money>,
}

impl SaleLine {
    pub fn new(item_id: ItemId, quantity: Quantity) -> Self {
        Self {
            item_id,
            quantity,
            unit_price: None,
        }
    }

    pub fn at_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// One line of a sale, with the price snapshotted when it was reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineItem {
    pub item_id: ItemId,
    /// Item description at the time of sale.
    pub description: String,
    pub quantity_sold: Quantity,
    pub unit_price_at_sale: Money,
    pub reservation: ReservationToken,
}

impl SaleLineItem {
    /// Price times quantity, or `None` if it does not fit in [`Money`].
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price_at_sale.checked_multiply(self.quantity_sold.get())
    }

    fn same_terms(&self, line: &SaleLine, unit_price: Money) -> bool {
        self.item_id == line.item_id
            && self.quantity_sold == line.quantity
            && self.unit_price_at_sale == unit_price
    }
}

/// Who ended a sale, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub at: DateTime<Utc>,
    pub by: String,
    pub reason: Option<String>,
}

/// Data for a new sale.
#[derive(Debug, Clone, Default)]
pub struct NewSale {
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<SaleLine>,
    pub discount: Discount,
}

/// Plain-data view of a sale, used for snapshots, audit states and
/// persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSnapshot {
    pub id: SaleId,
    pub invoice_number: InvoiceNumber,
    pub state: SaleState,
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub seller: String,
    pub line_items: Vec<SaleLineItem>,
    pub discount: Discount,
    pub subtotal: Money,
    pub final_total: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub voided: Option<Closure>,
    pub deleted: Option<Closure>,
}

/// Sale aggregate root.
///
/// A sale owns its line items; every line holds a ledger reservation for the
/// units it sells. `final_total` is computed whenever the lines or discount
/// change and is never recomputed lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    id: SaleId,
    invoice_number: InvoiceNumber,
    state: SaleState,
    customer: Option<String>,
    notes: Option<String>,
    seller: String,
    line_items: Vec<SaleLineItem>,
    discount: Discount,
    subtotal: Money,
    final_total: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    voided: Option<Closure>,
    deleted: Option<Closure>,
}

// Query methods
impl Sale {
    pub fn id(&self) -> SaleId {
        self.id
    }

    pub fn invoice_number(&self) -> &InvoiceNumber {
        &self.invoice_number
    }

    pub fn state(&self) -> SaleState {
        self.state
    }

    pub fn customer(&self) -> Option<&str> {
        self.customer.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn seller(&self) -> &str {
        &self.seller
    }

    pub fn line_items(&self) -> &[SaleLineItem] {
        &self.line_items
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn final_total(&self) -> Money {
        self.final_total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn voided(&self) -> Option<&Closure> {
        self.voided.as_ref()
    }

    pub fn deleted(&self) -> Option<&Closure> {
        self.deleted.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state == SaleState::Active
    }

    /// Returns the distinct items on this sale's lines.
    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.line_items.iter().map(|l| l.item_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Returns the reservation tokens of every line.
    pub fn reservations(&self) -> impl Iterator<Item = ReservationToken> + '_ {
        self.line_items.iter().map(|l| l.reservation)
    }

    pub fn total_quantity(&self) -> u32 {
        self.line_items.iter().map(|l| l.quantity_sold.get()).sum()
    }

    pub fn snapshot(&self) -> SaleSnapshot {
        SaleSnapshot {
            id: self.id,
            invoice_number: self.invoice_number.clone(),
            state: self.state,
            customer: self.customer.clone(),
            notes: self.notes.clone(),
            seller: self.seller.clone(),
            line_items: self.line_items.clone(),
            discount: self.discount,
            subtotal: self.subtotal,
            final_total: self.final_total,
            created_at: self.created_at,
            updated_at: self.updated_at,
            voided: self.voided.clone(),
            deleted: self.deleted.clone(),
        }
    }
}

// Command methods
impl Sale {
    /// Creates an active sale, reserving stock for every line.
    ///
    /// If any line cannot be reserved, the reservations made for earlier
    /// lines are released and the original error is returned.
    pub fn create(
        id: SaleId,
        invoice_number: InvoiceNumber,
        seller: impl Into<String>,
        new: NewSale,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<Sale> {
        validate_lines(&new.lines)?;

        let mut sale = Sale {
            id,
            invoice_number,
            state: SaleState::Draft,
            customer: new.customer,
            notes: new.notes,
            seller: seller.into(),
            line_items: Vec::with_capacity(new.lines.len()),
            discount: new.discount,
            subtotal: Money::zero(),
            final_total: Money::zero(),
            created_at: now,
            updated_at: now,
            voided: None,
            deleted: None,
        };

        let checkpoint = ledger.checkpoint();
        let result = (|| -> Result<(Money, Money)> {
            for line in &new.lines {
                sale.line_items.push(reserve_line(id, line, ledger)?);
            }
            totals(&sale.line_items, sale.discount)
        })();

        match result {
            Ok((subtotal, final_total)) => {
                sale.subtotal = subtotal;
                sale.final_total = final_total;
                sale.state = SaleState::Active;
                Ok(sale)
            }
            Err(e) => {
                ledger.rollback_to(checkpoint);
                Err(e)
            }
        }
    }

    /// Replaces the lines and discount of an active sale.
    ///
    /// A line is kept as-is only when item, quantity and price are all
    /// unchanged. Every other old line is released before any new line is
    /// reserved, so stock freed by the edit can be reused by it. On failure
    /// the ledger is rolled back and the sale is left untouched.
    pub fn edit(
        &mut self,
        lines: Vec<SaleLine>,
        discount: Discount,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.state.can_edit() {
            return Err(self.not_active("edit"));
        }
        validate_lines(&lines)?;

        let mut kept: HashMap<ItemId, &SaleLineItem> = HashMap::new();
        let mut to_release = Vec::new();
        for old in &self.line_items {
            let unchanged = lines.iter().find(|l| l.item_id == old.item_id).is_some_and(|l| {
                let price = l.unit_price.unwrap_or(old.unit_price_at_sale);
                old.same_terms(l, price)
            });
            if unchanged {
                kept.insert(old.item_id, old);
            } else {
                to_release.push(old.reservation);
            }
        }

        let checkpoint = ledger.checkpoint();
        let result = (|| -> Result<(Vec<SaleLineItem>, Money, Money)> {
            for token in &to_release {
                ledger.release(*token)?;
            }
            let mut line_items = Vec::with_capacity(lines.len());
            for line in &lines {
                match kept.get(&line.item_id) {
                    Some(old) => line_items.push((*old).clone()),
                    None => line_items.push(reserve_line(self.id, line, ledger)?),
                }
            }
            let (subtotal, final_total) = totals(&line_items, discount)?;
            Ok((line_items, subtotal, final_total))
        })();

        match result {
            Ok((line_items, subtotal, final_total)) => {
                self.line_items = line_items;
                self.discount = discount;
                self.subtotal = subtotal;
                self.final_total = final_total;
                self.updated_at = now;
                Ok(())
            }
            Err(e) => {
                ledger.rollback_to(checkpoint);
                Err(e)
            }
        }
    }

    /// Voids an active sale, returning every line's stock, held or sold.
    pub fn void(
        &mut self,
        actor: impl Into<String>,
        reason: Option<String>,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state == SaleState::Voided {
            return Err(DomainError::SaleAlreadyVoided(self.id));
        }
        if !self.state.can_void() {
            return Err(self.not_active("void"));
        }

        self.release_all(ledger)?;
        self.state = SaleState::Voided;
        self.voided = Some(Closure {
            at: now,
            by: actor.into(),
            reason,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Deletes an active or voided sale, returning any stock a void has not
    /// already returned. The sale is kept in the deleted state.
    pub fn delete(
        &mut self,
        actor: impl Into<String>,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.state.can_delete() {
            return Err(self.not_active("delete"));
        }

        self.release_all(ledger)?;
        self.state = SaleState::Deleted;
        self.deleted = Some(Closure {
            at: now,
            by: actor.into(),
            reason: None,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Commits every line's reservation, marking the stock as sold.
    pub(crate) fn commit_all(&self, ledger: &mut Ledger) -> Result<()> {
        let checkpoint = ledger.checkpoint();
        for token in self.reservations() {
            if let Err(e) = ledger.commit(token) {
                ledger.rollback_to(checkpoint);
                return Err(e);
            }
        }
        Ok(())
    }

    fn release_all(&self, ledger: &mut Ledger) -> Result<()> {
        let checkpoint = ledger.checkpoint();
        for token in self.reservations() {
            if let Err(e) = ledger.release(token) {
                ledger.rollback_to(checkpoint);
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn not_active(&self, action: &'static str) -> DomainError {
        DomainError::SaleNotActive {
            sale_id: self.id,
            state: self.state,
            action,
        }
    }
}

impl From<SaleSnapshot> for Sale {
    fn from(snapshot: SaleSnapshot) -> Self {
        Self {
            id: snapshot.id,
            invoice_number: snapshot.invoice_number,
            state: snapshot.state,
            customer: snapshot.customer,
            notes: snapshot.notes,
            seller: snapshot.seller,
            line_items: snapshot.line_items,
            discount: snapshot.discount,
            subtotal: snapshot.subtotal,
            final_total: snapshot.final_total,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            voided: snapshot.voided,
            deleted: snapshot.deleted,
        }
    }
}

/// Returns the subtotal and discounted final total of `line_items`.
fn totals(line_items: &[SaleLineItem], discount: Discount) -> Result<(Money, Money)> {
    let mut subtotal = Money::zero();
    for line in line_items {
        subtotal = line
            .line_total()
            .and_then(|total| subtotal.checked_add(total))
            .ok_or_else(|| {
                DomainError::invalid(format!(
                    "sale total is too large at the line for item {}",
                    line.item_id
                ))
            })?;
    }
    Ok((subtotal, discount.apply(subtotal)))
}

fn validate_lines(lines: &[SaleLine]) -> Result<()> {
    if lines.is_empty() {
        return Err(DomainError::invalid("a sale needs at least one line"));
    }
    let mut seen = HashSet::new();
    for line in lines {
        if !seen.insert(line.item_id) {
            return Err(DomainError::invalid(format!(
                "item {} appears on more than one line",
                line.item_id
            )));
        }
        if line.unit_price.is_some_and(|p| p.is_negative()) {
            return Err(DomainError::invalid("unit price must not be negative"));
        }
    }
    Ok(())
}

fn reserve_line(sale_id: SaleId, line: &SaleLine, ledger: &mut Ledger) -> Result<SaleLineItem> {
    let item = ledger
        .item(line.item_id)
        .ok_or(DomainError::ItemNotFound(line.item_id))?;
    let unit_price = line.unit_price.unwrap_or_else(|| item.unit_price());
    let description = item.description().to_string();
    let reservation = ledger.reserve(line.item_id, line.quantity, sale_id)?;

    Ok(SaleLineItem {
        item_id: line.item_id,
        description,
        quantity_sold: line.quantity,
        unit_price_at_sale: unit_price,
        reservation,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::inventory::{InventoryItem, ItemStatus, NewItem, ReservationState};

    fn qty(n: u32) -> Quantity {
        Quantity::new(n).unwrap()
    }

    fn item(total: u32, price_dollars: i64) -> InventoryItem {
        InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "Walnut table".into(),
                source_location: None,
                quantity: qty(total),
                unit_cost: Money::from_dollars(1),
                unit_price: Money::from_dollars(price_dollars),
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn invoice() -> InvoiceNumber {
        InvoiceNumber::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 1)
    }

    fn create(ledger: &mut Ledger, lines: Vec<SaleLine>, discount: Discount) -> Result<Sale> {
        Sale::create(
            SaleId::new(),
            invoice(),
            "clerk",
            NewSale {
                lines,
                discount,
                ..Default::default()
            },
            ledger,
            Utc::now(),
        )
    }

    #[test]
    fn create_reserves_and_totals() {
        let a = item(5, 10);
        let b = item(1, 7);
        let (a_id, b_id) = (a.id(), b.id());
        let mut ledger = Ledger::new([a, b], Utc::now());

        let sale = create(
            &mut ledger,
            vec![
                SaleLine::new(a_id, qty(3)),
                SaleLine::new(b_id, qty(1)).at_price(Money::from_cents(650)),
            ],
            Discount::percent(10).unwrap(),
        )
        .unwrap();

        assert_eq!(sale.state(), SaleState::Active);
        assert_eq!(sale.subtotal(), Money::from_cents(3650));
        assert_eq!(sale.final_total(), Money::from_cents(3285));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 2);
        assert_eq!(ledger.item(b_id).unwrap().status(), ItemStatus::Pending);
    }

    #[test]
    fn create_failure_releases_earlier_lines() {
        let a = item(5, 10);
        let b = item(1, 7);
        let (a_id, b_id) = (a.id(), b.id());
        let mut ledger = Ledger::new([a, b], Utc::now());

        let err = create(
            &mut ledger,
            vec![SaleLine::new(a_id, qty(2)), SaleLine::new(b_id, qty(2))],
            Discount::none(),
        )
        .unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { item_id, .. } if item_id == b_id));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 5);
        assert_eq!(ledger.item(a_id).unwrap().status(), ItemStatus::Available);
        assert_eq!(ledger.compensations().compensated.len(), 1);
    }

    #[test]
    fn create_rejects_empty_and_duplicate_lines() {
        let a = item(5, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());

        assert!(matches!(
            create(&mut ledger, vec![], Discount::none()),
            Err(DomainError::InvalidRequest(_))
        ));
        assert!(matches!(
            create(
                &mut ledger,
                vec![SaleLine::new(a_id, qty(1)), SaleLine::new(a_id, qty(1))],
                Discount::none()
            ),
            Err(DomainError::InvalidRequest(_))
        ));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 5);
    }

    #[test]
    fn create_refuses_totals_that_overflow() {
        let a = item(5, 10);
        let b = item(3, 10);
        let (a_id, b_id) = (a.id(), b.id());
        let mut ledger = Ledger::new([a, b], Utc::now());
        let huge = Money::from_cents(i64::MAX / 2 + 1);

        let err = create(
            &mut ledger,
            vec![SaleLine::new(a_id, qty(2)).at_price(huge)],
            Discount::none(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 5);

        // Each line fits on its own; their sum does not.
        let err = create(
            &mut ledger,
            vec![
                SaleLine::new(a_id, qty(1)).at_price(huge),
                SaleLine::new(b_id, qty(1)).at_price(huge),
            ],
            Discount::none(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 5);
        assert_eq!(ledger.item(b_id).unwrap().quantity_available(), 3);
    }

    #[test]
    fn edit_refusing_overflow_keeps_the_sale() {
        let a = item(5, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(2))], Discount::none())
            .unwrap();
        let before = sale.clone();

        let err = sale
            .edit(
                vec![SaleLine::new(a_id, qty(3)).at_price(Money::from_cents(i64::MAX / 2))],
                Discount::none(),
                &mut ledger,
                Utc::now(),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidRequest(_)));
        assert_eq!(sale, before);
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 3);
        assert_eq!(ledger.item(a_id).unwrap().quantity_held(), 2);
    }

    #[test]
    fn edit_reducing_quantity_returns_stock() {
        let a = item(5, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(3))], Discount::none())
            .unwrap();

        sale.edit(vec![SaleLine::new(a_id, qty(1))], Discount::none(), &mut ledger, Utc::now())
            .unwrap();

        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 4);
        assert_eq!(sale.final_total(), Money::from_dollars(10));
    }

    #[test]
    fn edit_keeps_unchanged_lines() {
        let a = item(5, 10);
        let b = item(2, 3);
        let (a_id, b_id) = (a.id(), b.id());
        let mut ledger = Ledger::new([a, b], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(2))], Discount::none())
            .unwrap();
        let original = sale.line_items()[0].reservation;

        sale.edit(
            vec![SaleLine::new(a_id, qty(2)), SaleLine::new(b_id, qty(2))],
            Discount::percent(50).unwrap(),
            &mut ledger,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(sale.line_items()[0].reservation, original);
        assert_eq!(sale.final_total(), Money::from_dollars(13));
        assert_eq!(ledger.item(b_id).unwrap().quantity_available(), 0);
    }

    #[test]
    fn edit_can_reuse_stock_it_frees() {
        let a = item(1, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(1))], Discount::none())
            .unwrap();

        sale.edit(
            vec![SaleLine::new(a_id, qty(1)).at_price(Money::from_dollars(8))],
            Discount::none(),
            &mut ledger,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(sale.final_total(), Money::from_dollars(8));
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 0);
    }

    #[test]
    fn failed_edit_leaves_sale_and_stock_unchanged() {
        let a = item(5, 10);
        let b = item(1, 3);
        let (a_id, b_id) = (a.id(), b.id());
        let mut ledger = Ledger::new([a, b], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(3))], Discount::none())
            .unwrap();
        let before = sale.clone();

        let err = sale
            .edit(
                vec![SaleLine::new(a_id, qty(1)), SaleLine::new(b_id, qty(2))],
                Discount::none(),
                &mut ledger,
                Utc::now(),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { .. }));
        assert_eq!(sale, before);
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 2);
        assert_eq!(ledger.item(b_id).unwrap().quantity_available(), 1);
    }

    #[test]
    fn void_then_void_again() {
        let a = item(2, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(2))], Discount::none())
            .unwrap();

        sale.void("owner", Some("customer changed mind".into()), &mut ledger, Utc::now())
            .unwrap();
        assert_eq!(sale.state(), SaleState::Voided);
        assert_eq!(ledger.item(a_id).unwrap().quantity_available(), 2);
        assert_eq!(sale.voided().unwrap().by, "owner");

        let err = sale.void("owner", None, &mut ledger, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::SaleAlreadyVoided(_)));
    }

    #[test]
    fn void_returns_committed_stock() {
        let a = item(5, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(3))], Discount::none())
            .unwrap();
        sale.commit_all(&mut ledger).unwrap();
        assert_eq!(ledger.item(a_id).unwrap().quantity_committed(), 3);

        sale.void("owner", None, &mut ledger, Utc::now()).unwrap();
        let item = ledger.item(a_id).unwrap();
        assert_eq!(item.quantity_available(), 5);
        assert_eq!(
            item.reservation(sale.line_items()[0].reservation.reservation_id)
                .unwrap()
                .state,
            ReservationState::Released
        );
    }

    #[test]
    fn delete_without_void_matches_void_then_delete() {
        let a = item(4, 10);
        let a_id = a.id();
        let mut direct = Ledger::new([a.clone()], Utc::now());
        let mut via_void = Ledger::new([a], Utc::now());

        let mut s1 = create(&mut direct, vec![SaleLine::new(a_id, qty(3))], Discount::none())
            .unwrap();
        let mut s2 = create(&mut via_void, vec![SaleLine::new(a_id, qty(3))], Discount::none())
            .unwrap();

        s1.delete("owner", &mut direct, Utc::now()).unwrap();
        s2.void("owner", None, &mut via_void, Utc::now()).unwrap();
        s2.delete("owner", &mut via_void, Utc::now()).unwrap();

        assert_eq!(s1.state(), SaleState::Deleted);
        assert_eq!(s2.state(), SaleState::Deleted);
        assert_eq!(
            direct.item(a_id).unwrap().quantity_available(),
            via_void.item(a_id).unwrap().quantity_available()
        );
        assert_eq!(direct.item(a_id).unwrap().quantity_available(), 4);

        let err = s1.delete("owner", &mut direct, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::SaleNotActive { .. }));
    }

    #[test]
    fn edit_requires_active_sale() {
        let a = item(2, 10);
        let a_id = a.id();
        let mut ledger = Ledger::new([a], Utc::now());
        let mut sale = create(&mut ledger, vec![SaleLine::new(a_id, qty(1))], Discount::none())
            .unwrap();
        sale.void("owner", None, &mut ledger, Utc::now()).unwrap();

        let err = sale
            .edit(vec![SaleLine::new(a_id, qty(1))], Discount::none(), &mut ledger, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::SaleNotActive {
                state: SaleState::Voided,
                ..
            }
        ));
    }
}
