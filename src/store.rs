//! Per-store deletion of expired records

use crate::config::StoreConfig;
use crate::error::{PrunerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;
use tracing::info;

/// The three stores this service prunes. Each maps to one table keyed by a
/// record timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    InstanceMetrics,
    AppMetrics,
    ScalingEngine,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::InstanceMetrics => "instancemetrics",
            StoreKind::AppMetrics => "appmetrics",
            StoreKind::ScalingEngine => "scalingengine",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            StoreKind::InstanceMetrics => "app_instance_metric",
            StoreKind::AppMetrics => "app_metric",
            StoreKind::ScalingEngine => "scaling_history",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one capability the orchestrator needs from a store: delete everything
/// older than the configured cutoff and report how many rows went.
#[async_trait]
pub trait Prune: Send + Sync {
    fn kind(&self) -> StoreKind;
    async fn prune_once(&self) -> Result<u64>;
}

/// Records with a timestamp before `now - cutoff_days` are eligible for
/// deletion.
pub fn cutoff_before(now: DateTime<Utc>, cutoff_days: i64) -> DateTime<Utc> {
    now - ChronoDuration::days(cutoff_days)
}

/// One store's connection pool plus its pruning policy. The pool is owned
/// here for the process lifetime and closed on shutdown.
pub struct Store {
    kind: StoreKind,
    pool: PgPool,
    cutoff_days: i64,
}

impl Store {
    /// Open the connection pool for one store. A connect failure names the
    /// store so the operator knows which of the three to look at.
    pub async fn connect(kind: StoreKind, config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.db_url)
            .await
            .map_err(|e| PrunerError::StoreConnect { kind, source: e })?;

        info!(store = %kind, "store connection pool established");
        Ok(Self {
            kind,
            pool,
            cutoff_days: config.cutoff_days,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Prune for Store {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    /// One logical deletion per run. The table name is fixed per store kind,
    /// so the dynamic query carries no external input.
    async fn prune_once(&self) -> Result<u64> {
        let cutoff = cutoff_before(Utc::now(), self.cutoff_days);
        let query = format!("DELETE FROM {} WHERE timestamp < $1", self.kind.table());

        let result = sqlx::query(&query).bind(cutoff).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
