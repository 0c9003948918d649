//! Commands accepted by the reconciliation controller.
//!
//! Every command names the actor performing it; the actor ends up on the
//! audit entry and on the touched records.

use common::{Discount, ItemId, Money, PaymentId, Quantity, SaleId};

use crate::error::{DomainError, Result};
use crate::inventory::{ItemChanges, NewItem};
use crate::payment::NewPayment;
use crate::sale::{NewSale, SaleLine};

/// Trait for commands that can be executed by the controller.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Who is performing the command.
    fn actor(&self) -> &str;

    /// Rejects commands without an actor.
    fn validate(&self) -> Result<()> {
        if self.actor().trim().is_empty() {
            return Err(DomainError::invalid("an actor is required"));
        }
        Ok(())
    }
}

macro_rules! impl_command {
    ($($name:ident),* $(,)?) => {
        $(
            impl Command for $name {
                fn actor(&self) -> &str {
                    &self.actor
                }
            }
        )*
    };
}

/// Command to add an item to inventory.
#[derive(Debug, Clone)]
pub struct RegisterItem {
    pub actor: String,
    pub item_id: ItemId,
    pub item: NewItem,
}

impl RegisterItem {
    /// Creates a new RegisterItem command with a generated item ID.
    pub fn new(actor: impl Into<String>, item: NewItem) -> Self {
        Self {
            actor: actor.into(),
            item_id: ItemId::new(),
            item,
        }
    }
}

/// Command to correct an item's description, location, prices or total
/// quantity.
#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub actor: String,
    pub item_id: ItemId,
    pub changes: ItemChanges,
}

impl UpdateItem {
    pub fn new(actor: impl Into<String>, item_id: ItemId) -> Self {
        Self {
            actor: actor.into(),
            item_id,
            changes: ItemChanges::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.changes.description = Some(description.into());
        self
    }

    pub fn source_location(mut self, location: Option<String>) -> Self {
        self.changes.source_location = Some(location);
        self
    }

    pub fn quantity(mut self, quantity_total: Quantity) -> Self {
        self.changes.quantity_total = Some(quantity_total);
        self
    }

    pub fn unit_cost(mut self, unit_cost: Money) -> Self {
        self.changes.unit_cost = Some(unit_cost);
        self
    }

    pub fn unit_price(mut self, unit_price: Money) -> Self {
        self.changes.unit_price = Some(unit_price);
        self
    }
}

impl Command for UpdateItem {
    fn actor(&self) -> &str {
        &self.actor
    }

    fn validate(&self) -> Result<()> {
        if self.actor.trim().is_empty() {
            return Err(DomainError::invalid("an actor is required"));
        }
        if self.changes.is_empty() {
            return Err(DomainError::invalid("nothing to update"));
        }
        Ok(())
    }
}

/// Command to remove an item no live sale refers to.
#[derive(Debug, Clone)]
pub struct RetireItem {
    pub actor: String,
    pub item_id: ItemId,
}

impl RetireItem {
    pub fn new(actor: impl Into<String>, item_id: ItemId) -> Self {
        Self {
            actor: actor.into(),
            item_id,
        }
    }
}

/// Command to create a sale.
#[derive(Debug, Clone)]
pub struct CreateSale {
    pub actor: String,
    pub sale_id: SaleId,
    pub sale: NewSale,
}

impl CreateSale {
    /// Creates a new CreateSale command with a generated sale ID.
    pub fn new(actor: impl Into<String>, lines: Vec<SaleLine>) -> Self {
        Self {
            actor: actor.into(),
            sale_id: SaleId::new(),
            sale: NewSale {
                lines,
                ..Default::default()
            },
        }
    }

    pub fn with_discount(mut self, discount: Discount) -> Self {
        self.sale.discount = discount;
        self
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.sale.customer = Some(customer.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.sale.notes = Some(notes.into());
        self
    }
}

/// Command to replace the lines and discount of a sale.
#[derive(Debug, Clone)]
pub struct EditSale {
    pub actor: String,
    pub sale_id: SaleId,
    pub lines: Vec<SaleLine>,
    pub discount: Discount,
}

impl EditSale {
    pub fn new(
        actor: impl Into<String>,
        sale_id: SaleId,
        lines: Vec<SaleLine>,
        discount: Discount,
    ) -> Self {
        Self {
            actor: actor.into(),
            sale_id,
            lines,
            discount,
        }
    }
}

/// Command to void a sale.
#[derive(Debug, Clone)]
pub struct VoidSale {
    pub actor: String,
    pub sale_id: SaleId,
    pub reason: Option<String>,
}

impl VoidSale {
    pub fn new(actor: impl Into<String>, sale_id: SaleId) -> Self {
        Self {
            actor: actor.into(),
            sale_id,
            reason: None,
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Command to delete a sale.
#[derive(Debug, Clone)]
pub struct DeleteSale {
    pub actor: String,
    pub sale_id: SaleId,
}

impl DeleteSale {
    pub fn new(actor: impl Into<String>, sale_id: SaleId) -> Self {
        Self {
            actor: actor.into(),
            sale_id,
        }
    }
}

/// Command to record a pending payment against a sale.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub actor: String,
    pub sale_id: SaleId,
    pub payment_id: PaymentId,
    pub payment: NewPayment,
}

impl RecordPayment {
    /// Creates a new RecordPayment command with a generated payment ID.
    pub fn new(actor: impl Into<String>, sale_id: SaleId, payment: NewPayment) -> Self {
        Self {
            actor: actor.into(),
            sale_id,
            payment_id: PaymentId::new(),
            payment,
        }
    }
}

/// Command to confirm a pending payment.
#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub actor: String,
    pub payment_id: PaymentId,
    pub notes: Option<String>,
}

impl ConfirmPayment {
    pub fn new(actor: impl Into<String>, payment_id: PaymentId) -> Self {
        Self {
            actor: actor.into(),
            payment_id,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Command to reject a pending payment.
#[derive(Debug, Clone)]
pub struct RejectPayment {
    pub actor: String,
    pub payment_id: PaymentId,
    pub reason: String,
}

impl RejectPayment {
    pub fn new(actor: impl Into<String>, payment_id: PaymentId, reason: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            payment_id,
            reason: reason.into(),
        }
    }
}

impl_command!(
    RegisterItem,
    RetireItem,
    CreateSale,
    EditSale,
    VoidSale,
    DeleteSale,
    RecordPayment,
    ConfirmPayment,
    RejectPayment,
);
