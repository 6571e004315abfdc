//! SQLite-backed implementation of `SpendStore`.
//!
//! Each operation is one upsert statement, so concurrent writers cannot
//! interleave a read-modify-write. TTLs are absolute expiry timestamps;
//! an expired row is logically absent and is overwritten in place by the
//! next write.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::time::Duration;

use tollgate_core::budget::ledger::SpendStore;
use tollgate_types::error::LedgerError;

use super::money::{from_micros, to_micros};
use super::pool::DatabasePool;

/// SQLite-backed spend counters and alert flags.
#[derive(Clone)]
pub struct SqliteSpendStore {
    pool: DatabasePool,
}

impl SqliteSpendStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn expiry(ttl: Option<Duration>) -> Option<String> {
    ttl.map(|t| (Utc::now() + chrono::Duration::from_std(t).unwrap_or_default()).to_rfc3339())
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn is_expired(expires_at: &Option<String>) -> Result<bool, LedgerError> {
    match expires_at {
        None => Ok(false),
        Some(s) => {
            let deadline = DateTime::parse_from_rfc3339(s)
                .map_err(|e| LedgerError::Storage(format!("invalid expiry: {e}")))?;
            Ok(deadline.with_timezone(&Utc) <= Utc::now())
        }
    }
}

impl SpendStore for SqliteSpendStore {
    async fn incr(
        &self,
        key: &str,
        amount: Decimal,
        ttl: Option<Duration>,
    ) -> Result<Decimal, LedgerError> {
        let amount_micros = to_micros(amount)?;
        // One upsert: a live row accumulates, an expired (or absent) row is
        // reinitialized with a fresh deadline.
        let row = sqlx::query(
            r#"INSERT INTO spend_counters (key, value_micros, expires_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT (key) DO UPDATE SET
                   value_micros = CASE
                       WHEN spend_counters.expires_at IS NOT NULL
                            AND spend_counters.expires_at <= ?4
                       THEN excluded.value_micros
                       ELSE spend_counters.value_micros + excluded.value_micros
                   END,
                   expires_at = CASE
                       WHEN spend_counters.expires_at IS NOT NULL
                            AND spend_counters.expires_at <= ?4
                       THEN excluded.expires_at
                       ELSE spend_counters.expires_at
                   END
               RETURNING value_micros"#,
        )
        .bind(key)
        .bind(amount_micros)
        .bind(expiry(ttl))
        .bind(now_str())
        .fetch_one(&self.pool.writer)
        .await
        .map_err(storage)?;

        let value: i64 = row.try_get(0).map_err(storage)?;
        Ok(from_micros(value))
    }

    async fn set_if_absent(&self, key: &str, ttl: Option<Duration>) -> Result<bool, LedgerError> {
        // The conditional DO UPDATE only fires on an expired row, so exactly
        // one of N concurrent claimants sees an affected row.
        let result = sqlx::query(
            r#"INSERT INTO spend_counters (key, value_micros, expires_at)
               VALUES (?1, 1000000, ?2)
               ON CONFLICT (key) DO UPDATE SET
                   value_micros = excluded.value_micros,
                   expires_at = excluded.expires_at
               WHERE spend_counters.expires_at IS NOT NULL
                     AND spend_counters.expires_at <= ?3"#,
        )
        .bind(key)
        .bind(expiry(ttl))
        .bind(now_str())
        .execute(&self.pool.writer)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<Decimal>, LedgerError> {
        let row = sqlx::query("SELECT value_micros, expires_at FROM spend_counters WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let expires_at: Option<String> = row.try_get("expires_at").map_err(storage)?;
                if is_expired(&expires_at)? {
                    return Ok(None);
                }
                let value: i64 = row.try_get("value_micros").map_err(storage)?;
                Ok(Some(from_micros(value)))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Decimal) -> Result<(), LedgerError> {
        let value_micros = to_micros(value)?;
        sqlx::query(
            r#"INSERT INTO spend_counters (key, value_micros, expires_at)
               VALUES (?, ?, NULL)
               ON CONFLICT (key) DO UPDATE SET
                   value_micros = excluded.value_micros,
                   expires_at = NULL"#,
        )
        .bind(key)
        .bind(value_micros)
        .execute(&self.pool.writer)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
