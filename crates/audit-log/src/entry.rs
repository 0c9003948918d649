use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditError, AuditId, ItemId, PaymentId, Result, SaleId};

/// The kind of mutation an audit entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RegisterItem,
    UpdateItem,
    RetireItem,
    CreateSale,
    EditSale,
    VoidSale,
    DeleteSale,
    RecordPayment,
    ConfirmPayment,
    RejectPayment,
    /// A corrective ledger operation applied by the consistency auditor.
    RepairInventory,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Operation::RegisterItem,
        Operation::UpdateItem,
        Operation::RetireItem,
        Operation::CreateSale,
        Operation::EditSale,
        Operation::VoidSale,
        Operation::DeleteSale,
        Operation::RecordPayment,
        Operation::ConfirmPayment,
        Operation::RejectPayment,
        Operation::RepairInventory,
    ];

    /// Returns the stable name used in storage and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::RegisterItem => "register_item",
            Operation::UpdateItem => "update_item",
            Operation::RetireItem => "retire_item",
            Operation::CreateSale => "create_sale",
            Operation::EditSale => "edit_sale",
            Operation::VoidSale => "void_sale",
            Operation::DeleteSale => "delete_sale",
            Operation::RecordPayment => "record_payment",
            Operation::ConfirmPayment => "confirm_payment",
            Operation::RejectPayment => "reject_payment",
            Operation::RepairInventory => "repair_inventory",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AuditError::InvalidValue {
                column: "operation",
                value: s.to_string(),
            })
    }
}

/// Whether the audited operation took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// The operation was rejected or rolled back; `error` is the message the
    /// caller received.
    Failed { error: String },
}

impl Outcome {
    /// Creates a failed outcome from any displayable error.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Outcome::Failed {
            error: error.to_string(),
        }
    }

    /// Returns true for a successful outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    /// Returns the stored label, `succeeded` or `failed`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed { .. } => "failed",
        }
    }

    /// Returns the error message of a failed outcome.
    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed { error } => Some(error),
        }
    }
}

/// An entity touched by an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Item(ItemId),
    Sale(SaleId),
    Payment(PaymentId),
}

impl From<ItemId> for Target {
    fn from(id: ItemId) -> Self {
        Target::Item(id)
    }
}

impl From<SaleId> for Target {
    fn from(id: SaleId) -> Self {
        Target::Sale(id)
    }
}

impl From<PaymentId> for Target {
    fn from(id: PaymentId) -> Self {
        Target::Payment(id)
    }
}

/// One immutable record in the audit log.
///
/// `before` and `after` hold JSON snapshots of the touched entities, so an
/// entry can be read without the domain types that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub id: AuditId,

    /// Who performed the operation (a user name, or `consistency_auditor`).
    pub actor: String,

    pub operation: Operation,

    pub outcome: Outcome,

    /// Every entity the operation read or wrote.
    pub targets: Vec<Target>,

    /// State of the targets before the operation.
    pub before: serde_json::Value,

    /// State of the targets after the operation. Equal to `before` for
    /// failed operations.
    pub after: serde_json::Value,

    /// When the operation finished.
    pub timestamp: DateTime<Utc>,

    /// Additional context, such as the compensations run on failure.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEntry {
    /// Creates a new audit entry builder.
    pub fn builder() -> AuditEntryBuilder {
        AuditEntryBuilder::default()
    }

    /// Returns true if the entry mentions the given entity.
    pub fn touches(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }
}

/// Builder for constructing audit entries.
#[derive(Debug, Default)]
pub struct AuditEntryBuilder {
    id: Option<AuditId>,
    actor: Option<String>,
    operation: Option<Operation>,
    outcome: Option<Outcome>,
    targets: Vec<Target>,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    timestamp: Option<DateTime<Utc>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl AuditEntryBuilder {
    /// Sets the entry ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: AuditId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Adds a target. Duplicates are ignored.
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        let target = target.into();
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
        self
    }

    /// Adds several targets.
    pub fn targets<T: Into<Target>>(self, targets: impl IntoIterator<Item = T>) -> Self {
        targets.into_iter().fold(self, |builder, t| builder.target(t))
    }

    /// Sets the before snapshot from a serializable value.
    pub fn before<T: Serialize>(mut self, state: &T) -> Result<Self> {
        self.before = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Sets the after snapshot from a serializable value.
    pub fn after<T: Serialize>(mut self, state: &T) -> Result<Self> {
        self.after = Some(serde_json::to_value(state)?);
        Ok(self)
    }

    /// Sets the before snapshot from a raw JSON value.
    pub fn before_raw(mut self, state: serde_json::Value) -> Self {
        self.before = Some(state);
        self
    }

    /// Sets the after snapshot from a raw JSON value.
    pub fn after_raw(mut self, state: serde_json::Value) -> Self {
        self.after = Some(state);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the entry.
    ///
    /// `actor`, `operation` and `outcome` are required. Missing snapshots
    /// default to JSON `null`, and a missing `after` copies `before`.
    pub fn build(self) -> Result<AuditEntry> {
        let before = self.before.unwrap_or(serde_json::Value::Null);
        Ok(AuditEntry {
            id: self.id.unwrap_or_default(),
            actor: self.actor.ok_or(AuditError::MissingField("actor"))?,
            operation: self.operation.ok_or(AuditError::MissingField("operation"))?,
            outcome: self.outcome.ok_or(AuditError::MissingField("outcome"))?,
            targets: self.targets,
            after: self.after.unwrap_or_else(|| before.clone()),
            before,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(
                serde_json::to_value(op).unwrap(),
                json!(op.as_str()),
                "serde name differs for {op}"
            );
        }
        assert!("refund_sale".parse::<Operation>().is_err());
    }

    #[test]
    fn builder_fills_entry() {
        let sale_id = SaleId::new();
        let item_id = ItemId::new();

        let entry = AuditEntry::builder()
            .actor("maria")
            .operation(Operation::CreateSale)
            .outcome(Outcome::Succeeded)
            .target(sale_id)
            .target(item_id)
            .target(sale_id)
            .before_raw(json!({"items": []}))
            .after_raw(json!({"items": [1]}))
            .metadata("invoice", json!("INV20240301-0001"))
            .build()
            .unwrap();

        assert_eq!(entry.actor, "maria");
        assert_eq!(entry.operation, Operation::CreateSale);
        assert_eq!(entry.targets, vec![Target::Sale(sale_id), Target::Item(item_id)]);
        assert!(entry.touches(Target::Item(item_id)));
        assert_eq!(entry.after, json!({"items": [1]}));
        assert_eq!(entry.metadata.get("invoice"), Some(&json!("INV20240301-0001")));
    }

    #[test]
    fn failed_entry_defaults_after_to_before() {
        let entry = AuditEntry::builder()
            .actor("maria")
            .operation(Operation::VoidSale)
            .outcome(Outcome::failed("sale already voided"))
            .before_raw(json!({"state": "voided"}))
            .build()
            .unwrap();

        assert_eq!(entry.after, entry.before);
        assert_eq!(entry.outcome.error(), Some("sale already voided"));
        assert_eq!(entry.outcome.as_str(), "failed");
    }

    #[test]
    fn build_reports_missing_fields() {
        let err = AuditEntry::builder()
            .operation(Operation::CreateSale)
            .outcome(Outcome::Succeeded)
            .build()
            .unwrap_err();
        assert!(matches!(err, AuditError::MissingField("actor")));
    }

    #[test]
    fn target_serializes_with_kind_tag() {
        let id = PaymentId::new();
        assert_eq!(
            serde_json::to_value(Target::Payment(id)).unwrap(),
            json!({"kind": "payment", "id": id.to_string()})
        );
    }
}
