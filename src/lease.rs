//! Lease primitive for leader election
//!
//! The distributed lock itself is owned by external infrastructure; this
//! module only defines the narrow capability the lock monitor consumes
//! (acquire/renew/release with explicit success/failure) and a Postgres
//! lock-table backend. Any conforming backend can stand in.

use crate::config::LockConfig;
use crate::error::{PrunerError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

/// One named lease, bound to a key and an owner token at construction.
///
/// `try_acquire` and `renew` return `Ok(false)` when another owner holds the
/// lease; transport failures surface as `Err`. The lock monitor treats both
/// the same way during renewal.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Attempt to take the lease. Non-blocking; the caller owns the retry loop.
    async fn try_acquire(&self) -> Result<bool>;

    /// Extend the lease TTL. `Ok(false)` means ownership was lost.
    async fn renew(&self) -> Result<bool>;

    /// Give the lease up so a standby can take over without waiting out the
    /// TTL. Best-effort.
    async fn release(&self) -> Result<()>;
}

/// Lease backend on a Postgres lock table.
///
/// A row per lease key carries the owner token and an expiry timestamp;
/// acquisition is an upsert that only steals expired rows, renewal and
/// release are token-guarded so a stolen lease can never be touched by the
/// old holder.
pub struct PgLeaseClient {
    pool: PgPool,
    key: String,
    owner: String,
    ttl: Duration,
}

impl PgLeaseClient {
    /// Connect to the lock database and make sure the lock table exists.
    /// The owner token is a fresh UUID per process.
    pub async fn connect(config: &LockConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.db_url)
            .await
            .map_err(PrunerError::LockConnect)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pruner_lock (
                key        TEXT PRIMARY KEY,
                owner      TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(PrunerError::LockConnect)?;

        Ok(Self {
            pool,
            key: config.key.clone(),
            owner: Uuid::new_v4().to_string(),
            ttl: Duration::from_secs(config.ttl_secs),
        })
    }

    /// Owner token identifying this process in the lock table.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LeaseClient for PgLeaseClient {
    async fn try_acquire(&self) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pruner_lock (key, owner, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (key) DO UPDATE
                SET owner = $2, expires_at = now() + make_interval(secs => $3)
                WHERE pruner_lock.expires_at < now() OR pruner_lock.owner = $2
            "#,
        )
        .bind(&self.key)
        .bind(&self.owner)
        .bind(self.ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| PrunerError::Lease(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pruner_lock
            SET expires_at = now() + make_interval(secs => $3)
            WHERE key = $1 AND owner = $2 AND expires_at >= now()
            "#,
        )
        .bind(&self.key)
        .bind(&self.owner)
        .bind(self.ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| PrunerError::Lease(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self) -> Result<()> {
        sqlx::query("DELETE FROM pruner_lock WHERE key = $1 AND owner = $2")
            .bind(&self.key)
            .bind(&self.owner)
            .execute(&self.pool)
            .await
            .map_err(|e| PrunerError::Lease(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory lease backend shared by unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Table {
        leases: HashMap<String, (String, Instant)>,
    }

    /// Fake lock service: one shared table, many clients.
    #[derive(Clone, Default)]
    pub struct FakeLockService {
        table: Arc<Mutex<Table>>,
    }

    impl FakeLockService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn client(&self, key: &str, ttl: Duration) -> FakeLeaseClient {
            FakeLeaseClient {
                service: self.clone(),
                key: key.to_string(),
                owner: Uuid::new_v4().to_string(),
                ttl,
                unreachable: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn holder(&self, key: &str) -> Option<String> {
            let table = self.table.lock().unwrap();
            table
                .leases
                .get(key)
                .filter(|(_, expires)| *expires > Instant::now())
                .map(|(owner, _)| owner.clone())
        }
    }

    pub struct FakeLeaseClient {
        service: FakeLockService,
        key: String,
        owner: String,
        ttl: Duration,
        unreachable: Arc<AtomicBool>,
    }

    impl FakeLeaseClient {
        /// Handle for simulating a lock-service outage from another task.
        pub fn outage_switch(&self) -> Arc<AtomicBool> {
            self.unreachable.clone()
        }

        pub fn owner(&self) -> &str {
            &self.owner
        }
    }

    #[async_trait]
    impl LeaseClient for FakeLeaseClient {
        async fn try_acquire(&self) -> Result<bool> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(PrunerError::Lease("lock service unreachable".into()));
            }
            let mut table = self.service.table.lock().unwrap();
            let now = Instant::now();
            match table.leases.get(&self.key) {
                Some((owner, expires)) if *expires > now && owner != &self.owner => Ok(false),
                _ => {
                    table
                        .leases
                        .insert(self.key.clone(), (self.owner.clone(), now + self.ttl));
                    Ok(true)
                }
            }
        }

        async fn renew(&self) -> Result<bool> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(PrunerError::Lease("lock service unreachable".into()));
            }
            let mut table = self.service.table.lock().unwrap();
            let now = Instant::now();
            match table.leases.get_mut(&self.key) {
                Some((owner, expires)) if *expires > now && owner == &self.owner => {
                    *expires = now + self.ttl;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn release(&self) -> Result<()> {
            let mut table = self.service.table.lock().unwrap();
            if let Some((owner, _)) = table.leases.get(&self.key) {
                if owner == &self.owner {
                    table.leases.remove(&self.key);
                }
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_service_exclusive_ownership() {
        let service = FakeLockService::new();
        let a = service.client("pruner", Duration::from_secs(15));
        let b = service.client("pruner", Duration::from_secs(15));

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        assert_eq!(service.holder("pruner").as_deref(), Some(a.owner()));

        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_service_expiry_allows_steal() {
        let service = FakeLockService::new();
        let a = service.client("pruner", Duration::from_secs(15));
        let b = service.client("pruner", Duration::from_secs(15));

        assert!(a.try_acquire().await.unwrap());
        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(b.try_acquire().await.unwrap());
        assert!(!a.renew().await.unwrap());
    }
}
