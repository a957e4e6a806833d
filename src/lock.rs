/// Distributed lock so only one instance drives the sync engine at a time.
///
/// Postgres session-level advisory locks (`pg_try_advisory_lock`) are the
/// primary mechanism — held for the lifetime of one pooled connection,
/// released automatically by Postgres if the holding connection drops. The
/// `app_locks` table is a supplementary record used for operator visibility
/// and for sweeping stale rows left by an instance that crashed without
/// releasing cleanly — the same "belt and suspenders over a single
/// primitive" shape as the teacher's `AtomicBatchWriter` backing a single
/// rocksdb `WriteBatch`.
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::LockError;
use crate::metrics;
use crate::types::AppLock;

#[derive(sqlx::FromRow)]
struct AppLockRow {
    name: String,
    instance_id: String,
    expires_at: DateTime<Utc>,
}

impl From<AppLockRow> for AppLock {
    fn from(row: AppLockRow) -> Self {
        AppLock {
            name: row.name,
            instance_id: row.instance_id,
            expires_at: row.expires_at,
        }
    }
}

fn lock_key(name: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

pub struct DistributedLock {
    name: String,
    instance_id: String,
    pool: PgPool,
}

/// Holds a dedicated connection for as long as the advisory lock is needed.
/// Dropping this releases the connection back to the pool, which in turn
/// ends the session and releases the advisory lock server-side.
pub struct LockGuard {
    name: String,
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
}

impl LockGuard {
    /// Explicitly unlocks and records the release, rather than relying on
    /// connection drop — used by the graceful shutdown handler so the lock
    /// frees before the pool itself is closed.
    pub async fn release(mut self, pool: &PgPool) -> Result<(), LockError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock_key(&self.name))
            .execute(&mut *self.conn)
            .await?;
        sqlx::query("DELETE FROM app_locks WHERE name = $1")
            .bind(&self.name)
            .execute(pool)
            .await?;
        metrics::set_lock_held(false);
        Ok(())
    }
}

impl DistributedLock {
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            pool,
        }
    }

    /// Attempts to acquire the lock without blocking. On success, also
    /// upserts an `app_locks` row recording which instance holds it.
    pub async fn try_acquire(&self, ttl_secs: i64) -> Result<Option<LockGuard>, LockError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS acquired")
            .bind(lock_key(&self.name))
            .fetch_one(&mut *conn)
            .await?;
        let acquired: bool = row.try_get("acquired")?;
        if !acquired {
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO app_locks (name, instance_id, expires_at)
             VALUES ($1, $2, now() + ($3 || ' seconds')::interval)
             ON CONFLICT (name) DO UPDATE SET
                 instance_id = excluded.instance_id,
                 expires_at = excluded.expires_at,
                 updated_at = now()",
        )
        .bind(&self.name)
        .bind(&self.instance_id)
        .bind(ttl_secs.to_string())
        .execute(&self.pool)
        .await?;

        metrics::set_lock_held(true);
        Ok(Some(LockGuard { name: self.name.clone(), conn }))
    }

    /// Reads the supplementary `app_locks` row for `name`, for operator
    /// visibility — e.g. logging which instance currently holds a lock
    /// without needing to inspect Postgres directly.
    pub async fn current(pool: &PgPool, name: &str) -> Result<Option<AppLock>, LockError> {
        let row = sqlx::query_as::<_, AppLockRow>(
            "SELECT name, instance_id, expires_at FROM app_locks WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Deletes `app_locks` rows whose `expires_at` has passed. A crashed
    /// holder's advisory lock releases when its connection drops, but the
    /// supplementary row would otherwise linger and mislead operators.
    pub async fn sweep_expired(pool: &PgPool) -> Result<u64, LockError> {
        let result = sqlx::query("DELETE FROM app_locks WHERE expires_at < now()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::lock_key;

    #[test]
    fn lock_key_is_deterministic() {
        assert_eq!(lock_key("sync-engine"), lock_key("sync-engine"));
    }

    #[test]
    fn lock_key_differs_by_name() {
        assert_ne!(lock_key("sync-engine"), lock_key("gap-repair"));
    }
}
