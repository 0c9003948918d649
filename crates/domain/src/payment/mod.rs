//! Payments recorded against sales.

use chrono::{DateTime, Utc};
use common::{Money, PaymentId, SaleId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::inventory::Ledger;
use crate::sale::Sale;

/// Reason given to a pending payment replaced by a newer one.
pub const SUPERSEDED_REASON: &str = "superseded by a newer payment";

/// How the customer paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Check,
    Card,
    Transfer,
    Zelle,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Check => "check",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Zelle => "zelle",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "check" => Ok(PaymentMethod::Check),
            "card" => Ok(PaymentMethod::Card),
            "transfer" => Ok(PaymentMethod::Transfer),
            "zelle" => Ok(PaymentMethod::Zelle),
            other => Err(DomainError::invalid(format!("unknown payment method {other:?}"))),
        }
    }
}

/// The state of a payment.
///
/// ```text
/// Pending ──┬──► Confirmed
///           └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(DomainError::invalid(format!("unknown payment status {other:?}"))),
        }
    }
}

/// Data for a new payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub method: PaymentMethod,
    pub amount: Money,
    /// Who took the money.
    pub received_by: Option<String>,
    pub notes: Option<String>,
}

/// Plain-data view of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub id: PaymentId,
    pub sale_id: SaleId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub status: PaymentStatus,
    pub received_by: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: String,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
}

/// A payment against a sale.
///
/// `confirmed_at` is set exactly when the payment becomes confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    inner: PaymentSnapshot,
}

impl Payment {
    /// Records a pending payment for an active sale.
    pub fn record(
        id: PaymentId,
        sale: &Sale,
        new: NewPayment,
        actor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Payment> {
        if !sale.state().accepts_payments() {
            return Err(sale.not_active("record a payment"));
        }
        if !new.amount.is_positive() {
            return Err(DomainError::invalid("payment amount must be positive"));
        }

        Ok(Payment {
            inner: PaymentSnapshot {
                id,
                sale_id: sale.id(),
                method: new.method,
                amount: new.amount,
                status: PaymentStatus::Pending,
                received_by: new.received_by,
                notes: new.notes,
                recorded_at: now,
                recorded_by: actor.into(),
                confirmed_at: None,
                confirmed_by: None,
                rejected_at: None,
                rejected_by: None,
                rejection_reason: None,
            },
        })
    }

    pub fn id(&self) -> PaymentId {
        self.inner.id
    }

    pub fn sale_id(&self) -> SaleId {
        self.inner.sale_id
    }

    pub fn method(&self) -> PaymentMethod {
        self.inner.method
    }

    pub fn amount(&self) -> Money {
        self.inner.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.status
    }

    pub fn is_pending(&self) -> bool {
        self.inner.status == PaymentStatus::Pending
    }

    pub fn received_by(&self) -> Option<&str> {
        self.inner.received_by.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.inner.notes.as_deref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.inner.recorded_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.confirmed_at
    }

    pub fn confirmed_by(&self) -> Option<&str> {
        self.inner.confirmed_by.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.inner.rejection_reason.as_deref()
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        self.inner.clone()
    }

    fn ensure_pending(&self) -> Result<()> {
        if !self.is_pending() {
            return Err(DomainError::PaymentNotPending {
                payment_id: self.inner.id,
                status: self.inner.status,
            });
        }
        Ok(())
    }

    /// Confirms the payment and commits every reservation of its sale.
    pub fn confirm(
        &mut self,
        actor: impl Into<String>,
        notes: Option<String>,
        sale: &Sale,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_pending()?;
        if sale.id() != self.inner.sale_id {
            return Err(DomainError::invalid(format!(
                "payment {} does not belong to sale {}",
                self.inner.id,
                sale.id()
            )));
        }
        if !sale.state().accepts_payments() {
            return Err(sale.not_active("confirm a payment"));
        }

        sale.commit_all(ledger)?;

        self.inner.status = PaymentStatus::Confirmed;
        self.inner.confirmed_at = Some(now);
        self.inner.confirmed_by = Some(actor.into());
        if notes.is_some() {
            self.inner.notes = notes;
        }
        Ok(())
    }

    /// Rejects a pending payment. Sale and stock are not affected.
    pub fn reject(
        &mut self,
        actor: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_pending()?;
        self.inner.status = PaymentStatus::Rejected;
        self.inner.rejected_at = Some(now);
        self.inner.rejected_by = Some(actor.into());
        self.inner.rejection_reason = Some(reason.into());
        Ok(())
    }
}

impl From<PaymentSnapshot> for Payment {
    fn from(snapshot: PaymentSnapshot) -> Self {
        Self { inner: snapshot }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use common::{Discount, ItemId, Quantity};

    use super::*;
    use crate::inventory::{InventoryItem, ItemStatus, NewItem};
    use crate::sale::{InvoiceNumber, NewSale, SaleLine};

    fn setup(total: u32, sold: u32) -> (Ledger, Sale, ItemId) {
        let item = InventoryItem::register(
            ItemId::new(),
            NewItem {
                description: "Mirror".into(),
                source_location: None,
                quantity: Quantity::new(total).unwrap(),
                unit_cost: Money::from_dollars(2),
                unit_price: Money::from_dollars(9),
            },
            Utc::now(),
        )
        .unwrap();
        let item_id = item.id();
        let mut ledger = Ledger::new([item], Utc::now());
        let sale = Sale::create(
            SaleId::new(),
            InvoiceNumber::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 1),
            "clerk",
            NewSale {
                lines: vec![SaleLine::new(item_id, Quantity::new(sold).unwrap())],
                discount: Discount::none(),
                ..Default::default()
            },
            &mut ledger,
            Utc::now(),
        )
        .unwrap();
        (ledger, sale, item_id)
    }

    fn cash(amount: i64) -> NewPayment {
        NewPayment {
            method: PaymentMethod::Cash,
            amount: Money::from_dollars(amount),
            received_by: Some("front desk".into()),
            notes: None,
        }
    }

    #[test]
    fn confirm_commits_reservations_once() {
        let (mut ledger, sale, item_id) = setup(5, 3);
        let mut payment =
            Payment::record(PaymentId::new(), &sale, cash(27), "clerk", Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert!(payment.confirmed_at().is_none());

        payment
            .confirm("owner", None, &sale, &mut ledger, Utc::now())
            .unwrap();

        assert_eq!(payment.status(), PaymentStatus::Confirmed);
        assert!(payment.confirmed_at().is_some());
        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.quantity_available(), 2);
        assert_eq!(item.quantity_committed(), 3);
        assert_eq!(item.status(), ItemStatus::Available);

        let err = payment
            .confirm("owner", None, &sale, &mut ledger, Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::PaymentNotPending {
                status: PaymentStatus::Confirmed,
                ..
            }
        ));
        assert_eq!(ledger.item(item_id).unwrap().quantity_available(), 2);
    }

    #[test]
    fn reject_leaves_stock_alone() {
        let (ledger, sale, item_id) = setup(1, 1);
        let mut payment =
            Payment::record(PaymentId::new(), &sale, cash(9), "clerk", Utc::now()).unwrap();

        payment.reject("owner", "check bounced", Utc::now()).unwrap();

        assert_eq!(payment.status(), PaymentStatus::Rejected);
        assert_eq!(payment.rejection_reason(), Some("check bounced"));
        assert_eq!(ledger.item(item_id).unwrap().status(), ItemStatus::Pending);
        assert!(payment.reject("owner", "again", Utc::now()).is_err());
    }

    #[test]
    fn record_requires_active_sale_and_positive_amount() {
        let (mut ledger, mut sale, _) = setup(1, 1);
        assert!(matches!(
            Payment::record(PaymentId::new(), &sale, cash(0), "clerk", Utc::now()),
            Err(DomainError::InvalidRequest(_))
        ));

        sale.void("owner", None, &mut ledger, Utc::now()).unwrap();
        assert!(matches!(
            Payment::record(PaymentId::new(), &sale, cash(9), "clerk", Utc::now()),
            Err(DomainError::SaleNotActive { .. })
        ));
    }

    #[test]
    fn parses_methods() {
        assert_eq!("Zelle".parse::<PaymentMethod>().unwrap(), PaymentMethod::Zelle);
        assert!("barter".parse::<PaymentMethod>().is_err());
    }
}
