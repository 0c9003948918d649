//! Consistency audit entry point.
//!
//! Scans the store for ledger inconsistencies, repairs them when
//! `AUDIT_REPAIR` is set, and prints the findings as JSON on stdout. Exits
//! with status 1 while inconsistencies remain.

use std::error::Error;

use audit_log::{AuditLog, InMemoryAuditLog, PostgresAuditLog};
use domain::{InMemoryStore, PostgresStore, Store};
use metrics_exporter_prometheus::PrometheusBuilder;
use reconciliation::{Config, ConsistencyAuditor};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    reconciliation::telemetry::init(&config)?;

    // 2. Metrics recorder, rendered on exit when asked for
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the stores and run
    let clean = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await?;
            let store = PostgresStore::new(pool.clone());
            store.run_migrations().await?;
            run(&config, store, PostgresAuditLog::new(pool)).await?
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, auditing an empty in-memory store");
            run(&config, InMemoryStore::new(), InMemoryAuditLog::new()).await?
        }
    };

    if config.print_metrics {
        eprintln!("{}", metrics_handle.render());
    }
    if !clean {
        std::process::exit(1);
    }
    Ok(())
}

/// Runs the scan, or the repair, and prints the result. Returns whether the
/// store is left consistent.
async fn run<S, A>(config: &Config, store: S, audit: A) -> Result<bool, Box<dyn Error>>
where
    S: Store,
    A: AuditLog,
{
    let auditor = ConsistencyAuditor::new(store, audit, config.audit_actor.as_str());
    tracing::info!(actor = auditor.actor(), repair = config.repair, "starting consistency audit");

    if config.repair {
        let report = auditor.repair().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(report.is_clean())
    } else {
        let violations = auditor.scan().await?;
        println!("{}", serde_json::to_string_pretty(&violations)?);
        Ok(violations.is_empty())
    }
}
