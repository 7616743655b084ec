//! SQLite backend
//!
//! Lets several reflex processes on one host share a cache and rate-limit
//! state through a single database file. Admission runs inside
//! `BEGIN IMMEDIATE`, which takes the write lock up front, so concurrent
//! check-and-consume calls from different processes serialize. The
//! transaction runs on its own task: a caller that times out stops waiting
//! but never leaves a pooled connection mid-transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tooling::rate_limit::{BucketConfig, TokenBucket};

use super::{
    full_at_ms, longest_wait, Admission, BucketRequest, BucketStore, CacheStore, StoreError,
    StoreResult,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS reflex_cache (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_reflex_cache_expires ON reflex_cache(expires_at)",
    "CREATE TABLE IF NOT EXISTS reflex_buckets (
        key TEXT PRIMARY KEY NOT NULL,
        tokens REAL NOT NULL,
        last_refill_ms INTEGER NOT NULL,
        full_at_ms INTEGER NOT NULL DEFAULT 0
    )",
];

// Databases created before idle eviction lack the column
const ADD_FULL_AT: &str =
    "ALTER TABLE reflex_buckets ADD COLUMN full_at_ms INTEGER NOT NULL DEFAULT 0";

fn to_sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the reflex tables if they are missing
    ///
    /// In-memory URLs get a single long-lived connection, since every
    /// connection to `sqlite::memory:` would otherwise see its own database.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the reflex tables if needed
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        let has_full_at = sqlx::query("SELECT full_at_ms FROM reflex_buckets LIMIT 0")
            .execute(&pool)
            .await
            .is_ok();
        if !has_full_at {
            sqlx::query(ADD_FULL_AT).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn admit(
        conn: &mut SqliteConnection,
        requests: &[BucketRequest],
        now_ms: u64,
    ) -> StoreResult<Admission> {
        let mut buckets = Vec::with_capacity(requests.len());
        let mut exhausted = Vec::new();

        for (index, req) in requests.iter().enumerate() {
            let row: Option<(f64, i64)> =
                sqlx::query_as("SELECT tokens, last_refill_ms FROM reflex_buckets WHERE key = ?")
                    .bind(&req.key)
                    .fetch_optional(&mut *conn)
                    .await?;

            let mut bucket = match row {
                Some((tokens, last_refill_ms)) => TokenBucket {
                    tokens,
                    last_refill_ms: last_refill_ms.max(0) as u64,
                },
                None => TokenBucket::full(&req.config, now_ms),
            };
            if let Err(e) = bucket.check(&req.config, req.cost, now_ms) {
                exhausted.push((index, e.retry_after));
            }
            buckets.push(bucket);
        }

        if let Some((index, retry_after)) = longest_wait(&exhausted) {
            return Ok(Admission::Denied { index, retry_after });
        }

        let mut remaining = Vec::with_capacity(requests.len());
        for (req, mut bucket) in requests.iter().zip(buckets) {
            bucket.tokens = (bucket.tokens - req.cost).max(0.0);
            sqlx::query(
                "INSERT INTO reflex_buckets (key, tokens, last_refill_ms, full_at_ms) VALUES (?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET tokens = excluded.tokens,
                    last_refill_ms = excluded.last_refill_ms, full_at_ms = excluded.full_at_ms",
            )
            .bind(&req.key)
            .bind(bucket.tokens)
            .bind(bucket.last_refill_ms as i64)
            .bind(to_sql_ms(full_at_ms(&bucket, &req.config)))
            .execute(&mut *conn)
            .await?;
            remaining.push(bucket.available());
        }

        Ok(Admission::Allowed { remaining })
    }

    /// One admission inside `BEGIN IMMEDIATE`
    ///
    /// If COMMIT or ROLLBACK fails the connection is detached from the pool
    /// and closed, since its transaction state is unknown.
    async fn admit_immediate(
        pool: &SqlitePool,
        requests: &[BucketRequest],
        now_ms: u64,
    ) -> StoreResult<Admission> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = Self::admit(&mut conn, requests, now_ms).await;
        let finish = if outcome.is_ok() { "COMMIT" } else { "ROLLBACK" };
        if let Err(err) = sqlx::query(finish).execute(&mut *conn).await {
            tracing::warn!("Bucket transaction {} failed, dropping connection: {}", finish, err);
            drop(conn.detach());
            return outcome.and(Err(err.into()));
        }
        outcome
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str, now_ms: u64) -> StoreResult<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>, i64)> =
            sqlx::query_as("SELECT value, expires_at FROM reflex_cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value, expires_at)) if expires_at > now_ms as i64 => Ok(Some(value)),
            Some(_) => {
                sqlx::query("DELETE FROM reflex_cache WHERE key = ? AND expires_at <= ?")
                    .bind(key)
                    .bind(now_ms as i64)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, expires_at_ms: u64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reflex_cache (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM reflex_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now_ms: u64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM reflex_cache WHERE expires_at <= ?")
            .bind(now_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BucketStore for SqliteStore {
    async fn consume_all(&self, requests: &[BucketRequest], now_ms: u64) -> StoreResult<Admission> {
        let pool = self.pool.clone();
        let requests = requests.to_vec();
        tokio::spawn(async move { Self::admit_immediate(&pool, &requests, now_ms).await })
            .await
            .map_err(|e| StoreError::Backend(format!("bucket admission task failed: {}", e)))?
    }

    async fn peek(&self, key: &str, config: &BucketConfig, now_ms: u64) -> StoreResult<u64> {
        let row: Option<(f64, i64)> =
            sqlx::query_as("SELECT tokens, last_refill_ms FROM reflex_buckets WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let mut bucket = match row {
            Some((tokens, last)) => TokenBucket {
                tokens,
                last_refill_ms: last.max(0) as u64,
            },
            None => return Ok(TokenBucket::full(config, now_ms).available()),
        };
        bucket.refill(config, now_ms);
        Ok(bucket.available())
    }

    async fn purge_idle(&self, now_ms: u64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM reflex_buckets WHERE full_at_ms <= ?")
            .bind(to_sql_ms(now_ms))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
