//! The inventory ledger: the only path through which stock moves.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use common::{ItemId, Quantity, ReservationId, SaleId};
use serde::Serialize;

use super::item::{InventoryItem, Reservation, ReservationState, ReservationToken};
use crate::error::{DomainError, Result};

/// A ledger operation, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStep {
    Reserve,
    Commit,
    Release,
    Reinstate,
    Recount,
    Resize,
}

impl LedgerStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStep::Reserve => "reserve",
            LedgerStep::Commit => "commit",
            LedgerStep::Release => "release",
            LedgerStep::Reinstate => "reinstate",
            LedgerStep::Recount => "recount",
            LedgerStep::Resize => "resize",
        }
    }
}

#[derive(Debug, Clone)]
struct JournalEntry {
    step: LedgerStep,
    item_id: ItemId,
    reservation_id: Option<ReservationId>,
    previous: Option<Reservation>,
    total_before: u32,
    available_before: u32,
}

impl JournalEntry {
    fn describe(&self) -> String {
        match self.reservation_id {
            Some(id) => format!("undo {} of reservation {id} on item {}", self.step.as_str(), self.item_id),
            None => format!("undo {} of item {}", self.step.as_str(), self.item_id),
        }
    }
}

/// Position in the journal to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Compensating steps run while rolling back a failed sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompensationReport {
    /// Steps that were undone.
    pub compensated: Vec<String>,
    /// Steps that could not be undone.
    pub outstanding: Vec<String>,
}

impl CompensationReport {
    pub fn is_empty(&self) -> bool {
        self.compensated.is_empty() && self.outstanding.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }

    fn extend(&mut self, other: &CompensationReport) {
        self.compensated.extend(other.compensated.iter().cloned());
        self.outstanding.extend(other.outstanding.iter().cloned());
    }
}

/// A unit-of-work view over a set of locked inventory items.
///
/// The caller loads every item an operation may touch, runs ledger
/// operations against this working set and then persists
/// [`touched`](Ledger::touched) items in the same transaction. Every step is
/// journaled, so a failed sequence can be undone with
/// [`rollback_to`](Ledger::rollback_to) before the error is returned.
#[derive(Debug)]
pub struct Ledger {
    items: BTreeMap<ItemId, InventoryItem>,
    touched: BTreeSet<ItemId>,
    journal: Vec<JournalEntry>,
    compensations: CompensationReport,
    now: DateTime<Utc>,
}

impl Ledger {
    /// Creates a ledger over the given items. `now` stamps every change.
    pub fn new(items: impl IntoIterator<Item = InventoryItem>, now: DateTime<Utc>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.id(), item)).collect(),
            touched: BTreeSet::new(),
            journal: Vec::new(),
            compensations: CompensationReport::default(),
            now,
        }
    }

    /// Adds an item to the working set. An item already tracked is kept as
    /// it is, including any change made to it.
    pub fn track(&mut self, item: InventoryItem) {
        self.items.entry(item.id()).or_insert(item);
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.contains_key(&item_id)
    }

    pub fn item(&self, item_id: ItemId) -> Option<&InventoryItem> {
        self.items.get(&item_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &InventoryItem> {
        self.items.values()
    }

    /// Items changed since the ledger was created.
    pub fn touched(&self) -> impl Iterator<Item = &InventoryItem> {
        self.touched.iter().filter_map(|id| self.items.get(id))
    }

    /// Compensations run so far.
    pub fn compensations(&self) -> &CompensationReport {
        &self.compensations
    }

    fn item_mut(&mut self, item_id: ItemId) -> Result<&mut InventoryItem> {
        self.items
            .get_mut(&item_id)
            .ok_or(DomainError::ItemNotFound(item_id))
    }

    fn record(
        &mut self,
        step: LedgerStep,
        item_id: ItemId,
        reservation_id: Option<ReservationId>,
        previous: Option<Reservation>,
        total_before: u32,
        available_before: u32,
    ) {
        self.touched.insert(item_id);
        self.journal.push(JournalEntry {
            step,
            item_id,
            reservation_id,
            previous,
            total_before,
            available_before,
        });
    }

    /// Takes `quantity` units of an item off the shelf for a sale.
    ///
    /// Fails with `InsufficientStock` when fewer units are available and with
    /// `ItemNotFound` when the item is not in the working set.
    pub fn reserve(
        &mut self,
        item_id: ItemId,
        quantity: Quantity,
        sale_id: SaleId,
    ) -> Result<ReservationToken> {
        let now = self.now;
        let item = self.item_mut(item_id)?;
        let (total_before, available_before) = (item.quantity_total(), item.quantity_available());
        let token = item.hold(ReservationId::new(), sale_id, quantity, now)?;
        self.record(
            LedgerStep::Reserve,
            item_id,
            Some(token.reservation_id),
            None,
            total_before,
            available_before,
        );
        Ok(token)
    }

    /// Marks reserved units as sold. Returns false if already committed.
    pub fn commit(&mut self, token: ReservationToken) -> Result<bool> {
        let now = self.now;
        let item = self.item_mut(token.item_id)?;
        let (total_before, available_before) = (item.quantity_total(), item.quantity_available());
        let previous = item.reservation(token.reservation_id).cloned();
        let prior_state = item.commit(token.reservation_id, now)?;
        if prior_state == ReservationState::Committed {
            return Ok(false);
        }
        self.record(
            LedgerStep::Commit,
            token.item_id,
            Some(token.reservation_id),
            previous,
            total_before,
            available_before,
        );
        Ok(true)
    }

    /// Puts reserved units back on the shelf, whether held or committed.
    /// Returns false if already released.
    pub fn release(&mut self, token: ReservationToken) -> Result<bool> {
        let now = self.now;
        let item = self.item_mut(token.item_id)?;
        let (total_before, available_before) = (item.quantity_total(), item.quantity_available());
        let previous = item.reservation(token.reservation_id).cloned();
        let prior_state = item.release(token.reservation_id, now)?;
        if !prior_state.is_active() {
            return Ok(false);
        }
        self.record(
            LedgerStep::Release,
            token.item_id,
            Some(token.reservation_id),
            previous,
            total_before,
            available_before,
        );
        Ok(true)
    }

    /// Recreates or resizes a reservation a sale line expects, in the given
    /// state. Used by consistency repairs.
    pub fn reinstate(
        &mut self,
        token: ReservationToken,
        sale_id: SaleId,
        quantity: Quantity,
        state: ReservationState,
    ) -> Result<()> {
        let now = self.now;
        let item = self.item_mut(token.item_id)?;
        let (total_before, available_before) = (item.quantity_total(), item.quantity_available());
        let previous = item.reservation(token.reservation_id).cloned();
        item.reinstate(token.reservation_id, sale_id, quantity, state, now)?;
        self.record(
            LedgerStep::Reinstate,
            token.item_id,
            Some(token.reservation_id),
            previous,
            total_before,
            available_before,
        );
        Ok(())
    }

    /// Resets an item's shelf count to what its reservations imply. Returns
    /// the previous count.
    pub fn recount(&mut self, item_id: ItemId) -> Result<u32> {
        let now = self.now;
        let item = self.item_mut(item_id)?;
        let total = item.quantity_total();
        let previous = item.recount(now);
        self.record(LedgerStep::Recount, item_id, None, None, total, previous);
        Ok(previous)
    }

    /// Changes an item's total unit count. Returns the previous total.
    ///
    /// Fails with `InvalidRequest` when the new total would not cover the
    /// units held or sold, or would take more units than are on the shelf.
    pub fn resize(&mut self, item_id: ItemId, quantity_total: Quantity) -> Result<u32> {
        let now = self.now;
        let item = self.item_mut(item_id)?;
        let available_before = item.quantity_available();
        let previous = item.resize(quantity_total, now)?;
        self.record(LedgerStep::Resize, item_id, None, None, previous, available_before);
        Ok(previous)
    }

    /// Returns the current journal position.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.journal.len())
    }

    /// Undoes every step recorded after `checkpoint`, newest first.
    ///
    /// Each undone step is reported as compensated; a step that cannot be
    /// undone is reported as outstanding and the rollback continues.
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) -> CompensationReport {
        let mut report = CompensationReport::default();
        let now = self.now;

        while self.journal.len() > checkpoint.0 {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            let description = entry.describe();
            let undone = match self.items.get_mut(&entry.item_id) {
                None => Err(DomainError::ItemNotFound(entry.item_id)),
                Some(item) => match entry.reservation_id {
                    Some(id) => item.restore(id, entry.previous, entry.available_before, now),
                    None => {
                        item.set_quantities(entry.total_before, entry.available_before, now);
                        Ok(())
                    }
                },
            };
            match undone {
                Ok(()) => report.compensated.push(description),
                Err(e) => report.outstanding.push(format!("{description}: {e}")),
            }
        }

        self.compensations.extend(&report);
        report
    }
}
