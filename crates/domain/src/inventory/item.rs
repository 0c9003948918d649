//! Inventory items and their reservations.

use chrono::{DateTime, Utc};
use common::{ItemId, Money, Quantity, ReservationId, SaleId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Sale status of an inventory item.
///
/// Never stored independently: it is always recomputed with
/// [`derive_status`] from the item's quantities and open holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Units can be reserved.
    Available,
    /// At least one unit is held by a sale awaiting payment.
    Pending,
    /// Every unit is sold.
    Sold,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Pending => "pending",
            ItemStatus::Sold => "sold",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes an item's status.
///
/// An item with units held by an unpaid sale is `Pending`. Without holds it
/// is `Sold` once nothing is left on the shelf, `Available` otherwise.
pub fn derive_status(quantity_available: u32, held: u32) -> ItemStatus {
    if held > 0 {
        ItemStatus::Pending
    } else if quantity_available == 0 {
        ItemStatus::Sold
    } else {
        ItemStatus::Available
    }
}

/// Lifecycle of a reservation.
///
/// ```text
/// Held ──► Committed
///   │          │
///   └──────────┴──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// Units are set aside for an unpaid sale.
    Held,
    /// Units are sold; the sale's payment was confirmed.
    Committed,
    /// Units went back on the shelf.
    Released,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Held => "held",
            ReservationState::Committed => "committed",
            ReservationState::Released => "released",
        }
    }

    /// Returns true while the reservation removes units from the shelf.
    pub fn is_active(&self) -> bool {
        !matches!(self, ReservationState::Released)
    }
}

impl std::str::FromStr for ReservationState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "held" => Ok(ReservationState::Held),
            "committed" => Ok(ReservationState::Committed),
            "released" => Ok(ReservationState::Released),
            other => Err(DomainError::invalid(format!(
                "unknown reservation state {other:?}"
            ))),
        }
    }
}

/// Handle to a reservation, kept by the sale line that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationToken {
    pub reservation_id: ReservationId,
    pub item_id: ItemId,
}

/// Units of one item set aside for one sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub sale_id: SaleId,
    pub quantity: Quantity,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
}

/// Intake data for a new inventory item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub description: String,
    pub source_location: Option<String>,
    pub quantity: Quantity,
    pub unit_cost: Money,
    pub unit_price: Money,
}

/// Corrections to an existing item. Fields left `None` keep their value.
///
/// Price changes apply to future sales only; existing lines keep the price
/// they were sold at.
#[derive(Debug, Clone, Default)]
pub struct ItemChanges {
    pub description: Option<String>,
    /// `Some(None)` clears the location.
    pub source_location: Option<Option<String>>,
    /// New total unit count. Goes through the ledger.
    pub quantity_total: Option<Quantity>,
    pub unit_cost: Option<Money>,
    pub unit_price: Option<Money>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.source_location.is_none()
            && self.quantity_total.is_none()
            && self.unit_cost.is_none()
            && self.unit_price.is_none()
    }
}

/// Plain-data view of an inventory item.
///
/// Used for snapshots returned to callers, audit before/after states and as
/// the persistence record. `status` is derived and ignored when restoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub description: String,
    pub source_location: Option<String>,
    pub status: ItemStatus,
    pub quantity_total: u32,
    pub quantity_available: u32,
    pub quantity_held: u32,
    pub quantity_committed: u32,
    pub unit_cost: Money,
    pub unit_price: Money,
    pub reservations: Vec<Reservation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stock-keeping unit with a fixed total quantity.
///
/// `quantity_available` drops when units are reserved and comes back when a
/// reservation is released. Committing a reservation does not touch the
/// shelf count: the units were already taken off when they were held.
///
/// Quantities only change through the [`Ledger`](super::Ledger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    id: ItemId,
    description: String,
    source_location: Option<String>,
    quantity_total: u32,
    quantity_available: u32,
    unit_cost: Money,
    unit_price: Money,
    reservations: Vec<Reservation>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Registers a new item with every unit available.
    pub fn register(id: ItemId, new: NewItem, now: DateTime<Utc>) -> Result<Self> {
        let description = new.description.trim().to_string();
        if description.is_empty() {
            return Err(DomainError::invalid("item description is required"));
        }
        if new.unit_cost.is_negative() || new.unit_price.is_negative() {
            return Err(DomainError::invalid("item prices must not be negative"));
        }

        Ok(Self {
            id,
            description,
            source_location: new.source_location,
            quantity_total: new.quantity.get(),
            quantity_available: new.quantity.get(),
            unit_cost: new.unit_cost,
            unit_price: new.unit_price,
            reservations: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies description, location and price corrections. The quantity
    /// in `changes` is left to [`Ledger::resize`](super::Ledger::resize).
    pub fn amend(&mut self, changes: &ItemChanges, now: DateTime<Utc>) -> Result<()> {
        let description = match &changes.description {
            Some(d) if d.trim().is_empty() => {
                return Err(DomainError::invalid("item description is required"));
            }
            Some(d) => d.trim().to_string(),
            None => self.description.clone(),
        };
        let unit_cost = changes.unit_cost.unwrap_or(self.unit_cost);
        let unit_price = changes.unit_price.unwrap_or(self.unit_price);
        if unit_cost.is_negative() || unit_price.is_negative() {
            return Err(DomainError::invalid("item prices must not be negative"));
        }

        self.description = description;
        if let Some(location) = &changes.source_location {
            self.source_location = location.clone();
        }
        self.unit_cost = unit_cost;
        self.unit_price = unit_price;
        self.updated_at = now;
        Ok(())
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn source_location(&self) -> Option<&str> {
        self.source_location.as_deref()
    }

    pub fn quantity_total(&self) -> u32 {
        self.quantity_total
    }

    pub fn quantity_available(&self) -> u32 {
        self.quantity_available
    }

    pub fn unit_cost(&self) -> Money {
        self.unit_cost
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns every reservation ever made on this item, released ones
    /// included.
    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Units held by unpaid sales.
    pub fn quantity_held(&self) -> u32 {
        self.sum_in_state(ReservationState::Held)
    }

    /// Units sold to paid sales.
    pub fn quantity_committed(&self) -> u32 {
        self.sum_in_state(ReservationState::Committed)
    }

    /// The shelf count implied by the reservations.
    pub fn expected_available(&self) -> u32 {
        self.quantity_total
            .saturating_sub(self.quantity_held() + self.quantity_committed())
    }

    pub fn status(&self) -> ItemStatus {
        derive_status(self.quantity_available, self.quantity_held())
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            description: self.description.clone(),
            source_location: self.source_location.clone(),
            status: self.status(),
            quantity_total: self.quantity_total,
            quantity_available: self.quantity_available,
            quantity_held: self.quantity_held(),
            quantity_committed: self.quantity_committed(),
            unit_cost: self.unit_cost,
            unit_price: self.unit_price,
            reservations: self.reservations.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn sum_in_state(&self, state: ReservationState) -> u32 {
        self.reservations
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.quantity.get())
            .sum()
    }

    fn reservation_mut(&mut self, id: ReservationId) -> Result<&mut Reservation> {
        let item_id = self.id;
        self.reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| {
                DomainError::invalid(format!("reservation {id} does not exist on item {item_id}"))
            })
    }

    pub(crate) fn hold(
        &mut self,
        id: ReservationId,
        sale_id: SaleId,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> Result<ReservationToken> {
        if quantity.get() > self.quantity_available {
            return Err(DomainError::InsufficientStock {
                item_id: self.id,
                requested: quantity.get(),
                available: self.quantity_available,
            });
        }
        if self.reservation(id).is_some() {
            return Err(DomainError::invalid(format!("reservation {id} already exists")));
        }

        self.quantity_available -= quantity.get();
        self.reservations.push(Reservation {
            id,
            sale_id,
            quantity,
            state: ReservationState::Held,
            created_at: now,
        });
        self.updated_at = now;

        Ok(ReservationToken {
            reservation_id: id,
            item_id: self.id,
        })
    }

    /// Returns the previous state. Committing twice is a no-op.
    pub(crate) fn commit(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationState> {
        let reservation = self.reservation_mut(id)?;
        let previous = reservation.state;
        match previous {
            ReservationState::Held => reservation.state = ReservationState::Committed,
            ReservationState::Committed => return Ok(previous),
            ReservationState::Released => {
                return Err(DomainError::invalid(format!(
                    "reservation {id} was released and cannot be committed"
                )));
            }
        }
        self.updated_at = now;
        Ok(previous)
    }

    /// Returns the previous state. Releasing twice is a no-op.
    pub(crate) fn release(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<ReservationState> {
        let reservation = self.reservation_mut(id)?;
        let previous = reservation.state;
        if !previous.is_active() {
            return Ok(previous);
        }
        reservation.state = ReservationState::Released;
        let units = reservation.quantity.get();
        self.quantity_available = (self.quantity_available + units).min(self.quantity_total);
        self.updated_at = now;
        Ok(previous)
    }

    /// Puts a reservation back into `state`, taking its units off the shelf
    /// again if it had been released. A missing reservation is recreated.
    pub(crate) fn reinstate(
        &mut self,
        id: ReservationId,
        sale_id: SaleId,
        quantity: Quantity,
        state: ReservationState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !state.is_active() {
            return Err(DomainError::invalid("cannot reinstate a reservation as released"));
        }

        // A resized reservation does not count its old quantity against the
        // shelf.
        let existing = self.reservations.iter().position(|r| r.id == id);
        let freed = existing
            .map(|index| &self.reservations[index])
            .filter(|r| r.state.is_active())
            .map_or(0, |r| r.quantity.get());
        let available = (self.quantity_available + freed).min(self.quantity_total);

        if quantity.get() > available {
            return Err(DomainError::InsufficientStock {
                item_id: self.id,
                requested: quantity.get(),
                available,
            });
        }

        self.quantity_available = available - quantity.get();
        let reservation = Reservation {
            id,
            sale_id,
            quantity,
            state,
            created_at: now,
        };
        match existing {
            Some(index) => {
                let created_at = self.reservations[index].created_at;
                self.reservations[index] = Reservation {
                    created_at,
                    ..reservation
                };
            }
            None => self.reservations.push(reservation),
        }
        self.updated_at = now;
        Ok(())
    }

    /// Puts a reservation and the shelf count back to recorded values. Only
    /// used to undo a ledger step. A reservation that did not exist before
    /// the step ends up released.
    pub(crate) fn restore(
        &mut self,
        id: ReservationId,
        previous: Option<Reservation>,
        quantity_available: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let reservation = self.reservation_mut(id)?;
        match previous {
            Some(previous) => *reservation = previous,
            None => reservation.state = ReservationState::Released,
        }
        self.set_available(quantity_available, now);
        Ok(())
    }

    /// Resets the shelf count to what the reservations imply. Returns the
    /// previous count.
    pub(crate) fn recount(&mut self, now: DateTime<Utc>) -> u32 {
        let previous = self.quantity_available;
        self.quantity_available = self.expected_available();
        self.updated_at = now;
        previous
    }

    /// Restores the shelf count to a recorded value.
    pub(crate) fn set_available(&mut self, quantity_available: u32, now: DateTime<Utc>) {
        self.quantity_available = quantity_available;
        self.updated_at = now;
    }

    /// Changes the total unit count, moving the difference on or off the
    /// shelf. Returns the previous total.
    ///
    /// Units held or sold cannot be removed, so the new total must cover
    /// them, and a shrink can only take units that are on the shelf.
    pub(crate) fn resize(&mut self, quantity_total: Quantity, now: DateTime<Utc>) -> Result<u32> {
        let previous = self.quantity_total;
        let total = quantity_total.get();
        let in_use = self.quantity_held() + self.quantity_committed();
        let available = if total >= previous {
            self.quantity_available.checked_add(total - previous)
        } else {
            self.quantity_available.checked_sub(previous - total)
        };
        let available = match available {
            Some(available) if total >= in_use => available,
            _ => {
                return Err(DomainError::invalid(format!(
                    "item {} has {in_use} units held or sold and {} on the shelf; \
                     its total cannot go from {previous} to {total}",
                    self.id, self.quantity_available
                )));
            }
        };

        self.quantity_total = total;
        self.quantity_available = available.min(total);
        self.updated_at = now;
        Ok(previous)
    }

    /// Puts both counts back to recorded values. Only used to undo a ledger
    /// step.
    pub(crate) fn set_quantities(
        &mut self,
        quantity_total: u32,
        quantity_available: u32,
        now: DateTime<Utc>,
    ) {
        self.quantity_total = quantity_total;
        self.set_available(quantity_available, now);
    }
}

impl From<ItemSnapshot> for InventoryItem {
    fn from(snapshot: ItemSnapshot) -> Self {
        Self {
            id: snapshot.id,
            description: snapshot.description,
            source_location: snapshot.source_location,
            quantity_total: snapshot.quantity_total,
            quantity_available: snapshot.quantity_available,
            unit_cost: snapshot.unit_cost,
            unit_price: snapshot.unit_price,
            reservations: snapshot.reservations,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: u32) -> Quantity {
        Quantity::new(n).unwrap()
    }

    fn item(total: u32) -> InventoryItem {
        InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "Oak dresser".into(),
                source_location: Some("Warehouse 2".into()),
                quantity: qty(total),
                unit_cost: Money::from_dollars(40),
                unit_price: Money::from_dollars(120),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn status_is_derived() {
        assert_eq!(derive_status(5, 0), ItemStatus::Available);
        assert_eq!(derive_status(2, 3), ItemStatus::Pending);
        assert_eq!(derive_status(0, 1), ItemStatus::Pending);
        assert_eq!(derive_status(0, 0), ItemStatus::Sold);
    }

    #[test]
    fn register_requires_description() {
        let result = InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "   ".into(),
                source_location: None,
                quantity: qty(1),
                unit_cost: Money::zero(),
                unit_price: Money::zero(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::InvalidRequest(_))));
    }

    #[test]
    fn hold_commit_release_cycle() {
        let mut item = item(5);
        let sale = SaleId::new();
        let now = Utc::now();
        let token = item.hold(ReservationId::new(), sale, qty(3), now).unwrap();

        assert_eq!(item.quantity_available(), 2);
        assert_eq!(item.status(), ItemStatus::Pending);

        assert_eq!(
            item.commit(token.reservation_id, now).unwrap(),
            ReservationState::Held
        );
        assert_eq!(
            item.commit(token.reservation_id, now).unwrap(),
            ReservationState::Committed
        );
        assert_eq!(item.quantity_available(), 2);
        assert_eq!(item.quantity_committed(), 3);
        assert_eq!(item.status(), ItemStatus::Available);

        item.release(token.reservation_id, now).unwrap();
        item.release(token.reservation_id, now).unwrap();
        assert_eq!(item.quantity_available(), 5);
        assert_eq!(item.status(), ItemStatus::Available);
    }

    #[test]
    fn hold_rejects_more_than_available() {
        let mut item = item(1);
        item.hold(ReservationId::new(), SaleId::new(), qty(1), Utc::now())
            .unwrap();
        let err = item
            .hold(ReservationId::new(), SaleId::new(), qty(1), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));
    }

    #[test]
    fn committed_single_unit_is_sold() {
        let mut item = item(1);
        let token = item
            .hold(ReservationId::new(), SaleId::new(), qty(1), Utc::now())
            .unwrap();
        item.commit(token.reservation_id, Utc::now()).unwrap();
        assert_eq!(item.status(), ItemStatus::Sold);
    }

    #[test]
    fn released_reservation_cannot_be_committed() {
        let mut item = item(2);
        let token = item
            .hold(ReservationId::new(), SaleId::new(), qty(1), Utc::now())
            .unwrap();
        item.release(token.reservation_id, Utc::now()).unwrap();
        assert!(item.commit(token.reservation_id, Utc::now()).is_err());
    }

    #[test]
    fn reinstate_resizes_reservation() {
        let mut item = item(5);
        let sale = SaleId::new();
        let id = ReservationId::new();
        item.hold(id, sale, qty(1), Utc::now()).unwrap();

        item.reinstate(id, sale, qty(3), ReservationState::Held, Utc::now())
            .unwrap();
        assert_eq!(item.quantity_available(), 2);
        assert_eq!(item.reservations().len(), 1);
        assert_eq!(item.reservation(id).unwrap().quantity.get(), 3);
    }

    #[test]
    fn recount_restores_expected_shelf() {
        let mut item = item(4);
        item.hold(ReservationId::new(), SaleId::new(), qty(1), Utc::now())
            .unwrap();
        item.set_available(0, Utc::now());
        assert_eq!(item.recount(Utc::now()), 0);
        assert_eq!(item.quantity_available(), 3);
    }

    #[test]
    fn snapshot_round_trip_keeps_state() {
        let mut item = item(3);
        item.hold(ReservationId::new(), SaleId::new(), qty(2), Utc::now())
            .unwrap();
        let snapshot = item.snapshot();
        assert_eq!(snapshot.status, ItemStatus::Pending);
        assert_eq!(snapshot.quantity_held, 2);
        assert_eq!(InventoryItem::from(snapshot), item);
    }

    #[test]
    fn resize_moves_units_on_and_off_the_shelf() {
        let mut item = item(4);
        item.hold(ReservationId::new(), SaleId::new(), qty(3), Utc::now())
            .unwrap();

        assert_eq!(item.resize(qty(6), Utc::now()).unwrap(), 4);
        assert_eq!(item.quantity_available(), 3);
        assert_eq!(item.resize(qty(3), Utc::now()).unwrap(), 6);
        assert_eq!(item.quantity_available(), 0);
        assert_eq!(item.status(), ItemStatus::Pending);
    }

    #[test]
    fn resize_cannot_drop_units_in_use() {
        let mut item = item(4);
        item.hold(ReservationId::new(), SaleId::new(), qty(3), Utc::now())
            .unwrap();

        let err = item.resize(qty(2), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
        assert_eq!(item.quantity_total(), 4);
        assert_eq!(item.quantity_available(), 1);
    }

    #[test]
    fn amend_validates_before_changing_anything() {
        let mut item = item(1);
        let bad = ItemChanges {
            description: Some("Oak bureau".into()),
            unit_price: Some(Money::from_cents(-1)),
            ..Default::default()
        };
        assert!(item.amend(&bad, Utc::now()).is_err());
        assert_eq!(item.description(), "Oak dresser");

        let good = ItemChanges {
            description: Some("  Oak bureau ".into()),
            source_location: Some(None),
            unit_cost: Some(Money::from_dollars(35)),
            ..Default::default()
        };
        item.amend(&good, Utc::now()).unwrap();
        assert_eq!(item.description(), "Oak bureau");
        assert_eq!(item.source_location(), None);
        assert_eq!(item.unit_cost(), Money::from_dollars(35));
        assert_eq!(item.unit_price(), Money::from_dollars(120));
    }
}
