//! Read access to the append-only ledger audit trail.
//!
//! The ledger writes one row per mutation (reserve, release, reconcile,
//! expire, reset); this store answers operational queries against them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use tollgate_types::error::LedgerError;

use super::money::from_micros;
use super::pool::DatabasePool;

/// One recorded ledger mutation.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub pool_name: String,
    pub op: String,
    pub reservation_id: Option<Uuid>,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Query interface over `ledger_audit`.
#[derive(Clone)]
pub struct SqliteAuditLog {
    pool: DatabasePool,
}

impl SqliteAuditLog {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recent mutations for one pool, newest first.
    pub async fn recent(&self, pool_name: &str, limit: u32) -> Result<Vec<AuditRecord>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT pool_name, op, reservation_id, amount_micros,
                      balance_before_micros, balance_after_micros, created_at
               FROM ledger_audit
               WHERE pool_name = ?
               ORDER BY id DESC
               LIMIT ?"#,
        )
        .bind(pool_name)
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    /// All mutations touching one reservation, in order.
    pub async fn for_reservation(
        &self,
        reservation_id: &Uuid,
    ) -> Result<Vec<AuditRecord>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT pool_name, op, reservation_id, amount_micros,
                      balance_before_micros, balance_after_micros, created_at
               FROM ledger_audit
               WHERE reservation_id = ?
               ORDER BY id ASC"#,
        )
        .bind(reservation_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord, LedgerError> {
    let storage = |e: sqlx::Error| LedgerError::Storage(e.to_string());

    let reservation_id: Option<String> = row.try_get("reservation_id").map_err(storage)?;
    let reservation_id = reservation_id
        .map(|s| {
            Uuid::parse_str(&s)
                .map_err(|e| LedgerError::Storage(format!("invalid reservation id: {e}")))
        })
        .transpose()?;
    let amount_micros: i64 = row.try_get("amount_micros").map_err(storage)?;
    let before_micros: i64 = row.try_get("balance_before_micros").map_err(storage)?;
    let after_micros: i64 = row.try_get("balance_after_micros").map_err(storage)?;
    let created_at: String = row.try_get("created_at").map_err(storage)?;

    Ok(AuditRecord {
        pool_name: row.try_get("pool_name").map_err(storage)?,
        op: row.try_get("op").map_err(storage)?,
        reservation_id,
        amount: from_micros(amount_micros),
        balance_before: from_micros(before_micros),
        balance_after: from_micros(after_micros),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LedgerError::Storage(format!("invalid datetime: {e}")))?,
    })
}
