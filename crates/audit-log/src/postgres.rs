use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{AuditEntry, AuditError, AuditFilter, AuditId, AuditLog, Outcome, Result, Target};

const SELECT_COLUMNS: &str = "SELECT id, actor, operation, outcome, error, targets, before_state, after_state, recorded_at, metadata FROM audit_entries";

/// PostgreSQL-backed audit log.
///
/// Writes go to the `audit_entries` table, which a trigger keeps append-only.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    /// Creates a new PostgreSQL audit log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_entry(row: PgRow) -> Result<AuditEntry> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;
        let targets: Vec<Target> = serde_json::from_value(row.try_get("targets")?)?;
        let operation: String = row.try_get("operation")?;
        let outcome: String = row.try_get("outcome")?;
        let error: Option<String> = row.try_get("error")?;

        let outcome = match (outcome.as_str(), error) {
            ("succeeded", _) => Outcome::Succeeded,
            ("failed", error) => Outcome::Failed {
                error: error.unwrap_or_default(),
            },
            (other, _) => {
                return Err(AuditError::InvalidValue {
                    column: "outcome",
                    value: other.to_string(),
                });
            }
        };

        Ok(AuditEntry {
            id: AuditId::from_uuid(row.try_get::<Uuid, _>("id")?),
            actor: row.try_get("actor")?,
            operation: operation.parse()?,
            outcome,
            targets,
            before: row.try_get("before_state")?,
            after: row.try_get("after_state")?,
            timestamp: row.try_get("recorded_at")?,
            metadata,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    #[tracing::instrument(skip(self, entry), fields(audit_id = %entry.id, operation = %entry.operation))]
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let targets = serde_json::to_value(&entry.targets)?;
        let metadata = serde_json::to_value(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO audit_entries
                (id, actor, operation, outcome, error, targets, before_state, after_state, recorded_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.actor)
        .bind(entry.operation.as_str())
        .bind(entry.outcome.as_str())
        .bind(entry.outcome.error())
        .bind(targets)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(entry.timestamp)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("audit_entries_id_key")
            {
                return AuditError::DuplicateEntry(entry.id);
            }
            AuditError::Database(e)
        })?;

        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        if filter.target.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND targets @> ${param_count}"));
        }
        if filter.actor.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND actor = ${param_count}"));
        }
        if filter.operations.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND operation = ANY(${param_count})"));
        }
        if filter.failures_only {
            sql.push_str(" AND outcome = 'failed'");
        }
        if filter.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND recorded_at >= ${param_count}"));
        }
        if filter.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND recorded_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY recorded_at ASC, position ASC");

        if filter.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if filter.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut query = sqlx::query(&sql);

        if let Some(target) = filter.target {
            query = query.bind(serde_json::to_value([target])?);
        }
        if let Some(actor) = filter.actor {
            query = query.bind(actor);
        }
        if let Some(operations) = filter.operations {
            let names: Vec<&str> = operations.iter().map(|op| op.as_str()).collect();
            query = query.bind(names);
        }
        if let Some(from_ts) = filter.from_timestamp {
            query = query.bind(from_ts);
        }
        if let Some(to_ts) = filter.to_timestamp {
            query = query.bind(to_ts);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = filter.offset {
            query = query.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
