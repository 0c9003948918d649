use chrono::{DateTime, Utc};

use crate::{AuditEntry, Operation, Target};

/// Builder for audit log queries.
///
/// Every criterion that is set must match; unset criteria match anything.
/// Results come back oldest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only entries that mention this entity.
    pub target: Option<Target>,

    pub actor: Option<String>,

    /// Any of these operations.
    pub operations: Option<Vec<Operation>>,

    /// Only entries whose operation failed.
    pub failures_only: bool,

    /// Entries at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Entries at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl AuditFilter {
    /// Creates a filter that matches every entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for the history of one entity.
    pub fn for_target(target: impl Into<Target>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }

    /// Creates a filter for one operation kind.
    pub fn for_operation(operation: Operation) -> Self {
        Self {
            operations: Some(vec![operation]),
            ..Default::default()
        }
    }

    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations = Some(vec![operation]);
        self
    }

    pub fn operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn failures_only(mut self) -> Self {
        self.failures_only = true;
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Checks the non-paging criteria against one entry.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(target) = self.target
            && !entry.touches(target)
        {
            return false;
        }
        if let Some(actor) = &self.actor
            && &entry.actor != actor
        {
            return false;
        }
        if let Some(operations) = &self.operations
            && !operations.contains(&entry.operation)
        {
            return false;
        }
        if self.failures_only && entry.outcome.is_success() {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && entry.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && entry.timestamp > to
        {
            return false;
        }
        true
    }
}
