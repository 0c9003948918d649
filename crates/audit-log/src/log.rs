use async_trait::async_trait;

use crate::{AuditEntry, AuditFilter, Result, Target};

/// Append-only store of audit entries.
///
/// Implementations never update or delete an entry once appended. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Appends one entry.
    ///
    /// Fails with `DuplicateEntry` if an entry with the same id exists.
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    /// Retrieves entries matching a filter, oldest first.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Returns the number of entries recorded.
    async fn count(&self) -> Result<usize>;
}

/// Extension trait providing convenience methods for audit logs.
#[async_trait]
pub trait AuditLogExt: AuditLog {
    /// Returns every entry that mentions an entity.
    async fn history_of(&self, target: Target) -> Result<Vec<AuditEntry>> {
        self.query(AuditFilter::for_target(target)).await
    }

    /// Returns the most recent entry matching a filter.
    async fn latest(&self, filter: AuditFilter) -> Result<Option<AuditEntry>> {
        Ok(self.query(filter).await?.pop())
    }
}

impl<T: AuditLog + ?Sized> AuditLogExt for T {}

#[async_trait]
impl<T: AuditLog + ?Sized> AuditLog for std::sync::Arc<T> {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        (**self).append(entry).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        (**self).query(filter).await
    }

    async fn count(&self) -> Result<usize> {
        (**self).count().await
    }
}
