//! SQLite-backed implementation of `BudgetLedger`.
//!
//! Reservation grants ride on a single conditional UPDATE
//! (`WHERE current_balance_micros >= ?`), so two workers racing for the
//! last dollar cannot both win: the write either decrements a sufficient
//! balance or affects zero rows. Settlements claim the reservation row with
//! a conditional state transition, making reconcile/release/expiry mutually
//! exclusive per reservation. Every mutation appends to `ledger_audit`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use tollgate_core::budget::ledger::BudgetLedger;
use tollgate_types::budget::{
    BudgetPool, Reconciliation, Reservation, ReservationState, ReserveOutcome,
};
use tollgate_types::config::PoolConfig;
use tollgate_types::error::LedgerError;

use super::money::{from_micros, to_micros};
use super::pool::DatabasePool;

/// SQLite-backed budget ledger with split read/write pools.
#[derive(Clone)]
pub struct SqliteBudgetLedger {
    pool: DatabasePool,
}

impl SqliteBudgetLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Create or update a pool from configuration.
    ///
    /// A new pool starts at its full limit. An existing pool keeps its
    /// balance and reset timestamp; the balance is clamped if the limit
    /// shrank below it.
    pub async fn ensure_pool(&self, config: &PoolConfig) -> Result<(), LedgerError> {
        let limit_micros = to_micros(config.monthly_limit)?;
        sqlx::query(
            r#"INSERT INTO budget_pools
                   (name, monthly_limit_micros, current_balance_micros,
                    reset_period, last_reset_at, alert_threshold)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (name) DO UPDATE SET
                   monthly_limit_micros = excluded.monthly_limit_micros,
                   current_balance_micros =
                       MIN(budget_pools.current_balance_micros, excluded.monthly_limit_micros),
                   reset_period = excluded.reset_period,
                   alert_threshold = excluded.alert_threshold"#,
        )
        .bind(&config.name)
        .bind(limit_micros)
        .bind(limit_micros)
        .bind(config.reset_period.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(config.alert_threshold_fraction)
        .execute(&self.pool.writer)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct PoolRow {
    name: String,
    monthly_limit_micros: i64,
    current_balance_micros: i64,
    reset_period: String,
    last_reset_at: String,
    alert_threshold: f64,
}

impl PoolRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            monthly_limit_micros: row.try_get("monthly_limit_micros")?,
            current_balance_micros: row.try_get("current_balance_micros")?,
            reset_period: row.try_get("reset_period")?,
            last_reset_at: row.try_get("last_reset_at")?,
            alert_threshold: row.try_get("alert_threshold")?,
        })
    }

    fn into_pool(self) -> Result<BudgetPool, LedgerError> {
        Ok(BudgetPool {
            monthly_limit: from_micros(self.monthly_limit_micros),
            current_balance: from_micros(self.current_balance_micros),
            reset_period: self.reset_period.parse().map_err(LedgerError::Storage)?,
            last_reset_at: parse_datetime(&self.last_reset_at)?,
            alert_threshold_fraction: self.alert_threshold,
            name: self.name,
        })
    }
}

struct ReservationRow {
    id: String,
    pool_name: String,
    amount_micros: i64,
    state: String,
    created_at: String,
}

impl ReservationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            pool_name: row.try_get("pool_name")?,
            amount_micros: row.try_get("amount_micros")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_reservation(self) -> Result<Reservation, LedgerError> {
        Ok(Reservation {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| LedgerError::Storage(format!("invalid reservation id: {e}")))?,
            pool_name: self.pool_name,
            amount: from_micros(self.amount_micros),
            created_at: parse_datetime(&self.created_at)?,
            state: self.state.parse().map_err(LedgerError::Storage)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

type SqliteTx<'a> = sqlx::Transaction<'a, sqlx::Sqlite>;

async fn pool_balance(tx: &mut SqliteTx<'_>, pool: &str) -> Result<Option<i64>, LedgerError> {
    let row = sqlx::query("SELECT current_balance_micros FROM budget_pools WHERE name = ?")
        .bind(pool)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    match row {
        Some(row) => Ok(Some(row.try_get(0).map_err(storage)?)),
        None => Ok(None),
    }
}

async fn record_audit(
    tx: &mut SqliteTx<'_>,
    pool: &str,
    op: &str,
    reservation_id: Option<&Uuid>,
    amount_micros: i64,
    balance_before: i64,
    balance_after: i64,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"INSERT INTO ledger_audit
               (pool_name, op, reservation_id, amount_micros,
                balance_before_micros, balance_after_micros, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(pool)
    .bind(op)
    .bind(reservation_id.map(|id| id.to_string()))
    .bind(amount_micros)
    .bind(balance_before)
    .bind(balance_after)
    .bind(format_datetime(&Utc::now()))
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

/// Claim an open reservation row, returning its pool and held amount.
///
/// Exactly one of reconcile/release/expiry wins this transition; losers see
/// `AlreadySettled`.
async fn claim_open_reservation(
    tx: &mut SqliteTx<'_>,
    reservation_id: &Uuid,
    new_state: ReservationState,
) -> Result<(String, i64), LedgerError> {
    let claimed = sqlx::query("UPDATE reservations SET state = ? WHERE id = ? AND state = 'open'")
        .bind(new_state.to_string())
        .bind(reservation_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

    if claimed.rows_affected() == 0 {
        let exists = sqlx::query("SELECT id FROM reservations WHERE id = ?")
            .bind(reservation_id.to_string())
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage)?;
        return match exists {
            Some(_) => Err(LedgerError::AlreadySettled(*reservation_id)),
            None => Err(LedgerError::ReservationNotFound(*reservation_id)),
        };
    }

    let row = sqlx::query("SELECT pool_name, amount_micros FROM reservations WHERE id = ?")
        .bind(reservation_id.to_string())
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;
    Ok((
        row.try_get("pool_name").map_err(storage)?,
        row.try_get("amount_micros").map_err(storage)?,
    ))
}

// ---------------------------------------------------------------------------
// BudgetLedger implementation
// ---------------------------------------------------------------------------

impl BudgetLedger for SqliteBudgetLedger {
    async fn try_reserve(
        &self,
        pool: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(amount.to_string()));
        }
        let amount_micros = to_micros(amount)?;
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;

        // The conditional decrement is the whole race: it either holds the
        // funds or touches nothing.
        let updated = sqlx::query(
            r#"UPDATE budget_pools
               SET current_balance_micros = current_balance_micros - ?
               WHERE name = ? AND current_balance_micros >= ?"#,
        )
        .bind(amount_micros)
        .bind(pool)
        .bind(amount_micros)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if updated.rows_affected() == 0 {
            let balance = pool_balance(&mut tx, pool)
                .await?
                .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
            tx.rollback().await.map_err(storage)?;
            return Ok(ReserveOutcome::InsufficientFunds {
                balance: from_micros(balance),
            });
        }

        let balance_after = pool_balance(&mut tx, pool)
            .await?
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;

        let reservation = Reservation {
            id: Uuid::now_v7(),
            pool_name: pool.to_string(),
            amount: from_micros(amount_micros),
            created_at: Utc::now(),
            state: ReservationState::Open,
        };
        sqlx::query(
            r#"INSERT INTO reservations (id, pool_name, amount_micros, state, created_at)
               VALUES (?, ?, ?, 'open', ?)"#,
        )
        .bind(reservation.id.to_string())
        .bind(&reservation.pool_name)
        .bind(amount_micros)
        .bind(format_datetime(&reservation.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let balance_before = balance_after + amount_micros;
        record_audit(
            &mut tx,
            pool,
            "reserve",
            Some(&reservation.id),
            amount_micros,
            balance_before,
            balance_after,
        )
        .await?;
        tx.commit().await.map_err(storage)?;

        Ok(ReserveOutcome::Granted {
            reservation,
            balance_before: from_micros(balance_before),
        })
    }

    async fn release(&self, reservation_id: &Uuid) -> Result<(), LedgerError> {
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;
        let (pool_name, amount_micros) =
            claim_open_reservation(&mut tx, reservation_id, ReservationState::Reconciled).await?;

        let balance_before = pool_balance(&mut tx, &pool_name)
            .await?
            .ok_or_else(|| LedgerError::PoolNotFound(pool_name.clone()))?;
        sqlx::query(
            r#"UPDATE budget_pools
               SET current_balance_micros =
                   MIN(current_balance_micros + ?, monthly_limit_micros)
               WHERE name = ?"#,
        )
        .bind(amount_micros)
        .bind(&pool_name)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        let balance_after = pool_balance(&mut tx, &pool_name)
            .await?
            .ok_or_else(|| LedgerError::PoolNotFound(pool_name.clone()))?;

        record_audit(
            &mut tx,
            &pool_name,
            "release",
            Some(reservation_id),
            amount_micros,
            balance_before,
            balance_after,
        )
        .await?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn reconcile(
        &self,
        reservation_id: &Uuid,
        actual: Decimal,
    ) -> Result<Reconciliation, LedgerError> {
        if actual.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(actual.to_string()));
        }
        let actual_micros = to_micros(actual)?;
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;
        let (pool_name, reserved_micros) =
            claim_open_reservation(&mut tx, reservation_id, ReservationState::Reconciled).await?;

        let row = sqlx::query(
            "SELECT current_balance_micros, monthly_limit_micros FROM budget_pools WHERE name = ?",
        )
        .bind(&pool_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .ok_or_else(|| LedgerError::PoolNotFound(pool_name.clone()))?;
        let balance: i64 = row.try_get("current_balance_micros").map_err(storage)?;
        let limit: i64 = row.try_get("monthly_limit_micros").map_err(storage)?;

        // The writer pool is a single serialized connection, so computing
        // the clamped delta here and writing it back stays atomic.
        let delta = reserved_micros - actual_micros;
        let mut refunded = 0i64;
        let mut extra_debited = 0i64;
        let mut overage_accepted = 0i64;
        if delta > 0 {
            refunded = delta.min(limit - balance);
        } else if delta < 0 {
            let overage = -delta;
            extra_debited = overage.min(balance);
            overage_accepted = overage - extra_debited;
        }
        let new_balance = balance + refunded - extra_debited;

        sqlx::query("UPDATE budget_pools SET current_balance_micros = ? WHERE name = ?")
            .bind(new_balance)
            .bind(&pool_name)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        record_audit(
            &mut tx,
            &pool_name,
            "reconcile",
            Some(reservation_id),
            actual_micros,
            balance,
            new_balance,
        )
        .await?;
        tx.commit().await.map_err(storage)?;

        Ok(Reconciliation {
            reservation_id: *reservation_id,
            pool_name,
            reserved: from_micros(reserved_micros),
            actual: from_micros(actual_micros),
            refunded: from_micros(refunded),
            extra_debited: from_micros(extra_debited),
            overage_accepted: from_micros(overage_accepted),
            balance_after: from_micros(new_balance),
        })
    }

    async fn balance(&self, pool: &str) -> Result<Decimal, LedgerError> {
        let row = sqlx::query("SELECT current_balance_micros FROM budget_pools WHERE name = ?")
            .bind(pool)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
        let micros: i64 = row.try_get(0).map_err(storage)?;
        Ok(from_micros(micros))
    }

    async fn pool(&self, pool: &str) -> Result<BudgetPool, LedgerError> {
        let row = sqlx::query("SELECT * FROM budget_pools WHERE name = ?")
            .bind(pool)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage)?
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
        PoolRow::from_row(&row).map_err(storage)?.into_pool()
    }

    async fn pools(&self) -> Result<Vec<BudgetPool>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM budget_pools ORDER BY name")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(storage)?;
        let mut pools = Vec::with_capacity(rows.len());
        for row in &rows {
            pools.push(PoolRow::from_row(row).map_err(storage)?.into_pool()?);
        }
        Ok(pools)
    }

    async fn reset_due_pools(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let rows = sqlx::query("SELECT * FROM budget_pools")
            .fetch_all(&self.pool.writer)
            .await
            .map_err(storage)?;

        let mut reset = Vec::new();
        for row in &rows {
            let pool = PoolRow::from_row(row).map_err(storage)?.into_pool()?;
            if !pool.reset_due(now) {
                continue;
            }

            let mut tx = self.pool.writer.begin().await.map_err(storage)?;
            // Compare-and-set on last_reset_at: concurrent sweepers reset
            // each pool at most once per period.
            let updated = sqlx::query(
                r#"UPDATE budget_pools
                   SET current_balance_micros = monthly_limit_micros, last_reset_at = ?
                   WHERE name = ? AND last_reset_at = ?"#,
            )
            .bind(format_datetime(&now))
            .bind(&pool.name)
            .bind(format_datetime(&pool.last_reset_at))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            if updated.rows_affected() == 1 {
                let balance_before = to_micros(pool.current_balance)?;
                let limit = to_micros(pool.monthly_limit)?;
                record_audit(&mut tx, &pool.name, "reset", None, limit, balance_before, limit)
                    .await?;
                tx.commit().await.map_err(storage)?;
                reset.push(pool.name);
            } else {
                tx.rollback().await.map_err(storage)?;
            }
        }
        Ok(reset)
    }

    async fn expire_stale(&self, ttl: Duration) -> Result<Vec<Reservation>, LedgerError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;

        let rows = sqlx::query(
            "SELECT * FROM reservations WHERE state = 'open' AND created_at < ?",
        )
        .bind(format_datetime(&cutoff))
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        let mut expired = Vec::new();
        for row in &rows {
            let mut reservation = ReservationRow::from_row(row)
                .map_err(storage)?
                .into_reservation()?;
            let amount_micros = to_micros(reservation.amount)?;

            let claimed = sqlx::query(
                "UPDATE reservations SET state = 'expired' WHERE id = ? AND state = 'open'",
            )
            .bind(reservation.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            if claimed.rows_affected() == 0 {
                continue;
            }

            let balance_before = pool_balance(&mut tx, &reservation.pool_name)
                .await?
                .ok_or_else(|| LedgerError::PoolNotFound(reservation.pool_name.clone()))?;
            sqlx::query(
                r#"UPDATE budget_pools
                   SET current_balance_micros =
                       MIN(current_balance_micros + ?, monthly_limit_micros)
                   WHERE name = ?"#,
            )
            .bind(amount_micros)
            .bind(&reservation.pool_name)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            let balance_after = pool_balance(&mut tx, &reservation.pool_name)
                .await?
                .ok_or_else(|| LedgerError::PoolNotFound(reservation.pool_name.clone()))?;

            record_audit(
                &mut tx,
                &reservation.pool_name,
                "expire",
                Some(&reservation.id),
                amount_micros,
                balance_before,
                balance_after,
            )
            .await?;

            reservation.state = ReservationState::Expired;
            expired.push(reservation);
        }
        tx.commit().await.map_err(storage)?;
        Ok(expired)
    }

    async fn set_limit(&self, pool: &str, limit: Decimal) -> Result<BudgetPool, LedgerError> {
        if limit.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(limit.to_string()));
        }
        let limit_micros = to_micros(limit)?;
        let mut tx = self.pool.writer.begin().await.map_err(storage)?;

        let balance_before = pool_balance(&mut tx, pool)
            .await?
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
        sqlx::query(
            r#"UPDATE budget_pools
               SET monthly_limit_micros = ?,
                   current_balance_micros = MIN(current_balance_micros, ?)
               WHERE name = ?"#,
        )
        .bind(limit_micros)
        .bind(limit_micros)
        .bind(pool)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        let balance_after = pool_balance(&mut tx, pool)
            .await?
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;

        record_audit(
            &mut tx,
            pool,
            "set_limit",
            None,
            limit_micros,
            balance_before,
            balance_after,
        )
        .await?;

        let row = sqlx::query("SELECT * FROM budget_pools WHERE name = ?")
            .bind(pool)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let updated = PoolRow::from_row(&row).map_err(storage)?.into_pool()?;
        tx.commit().await.map_err(storage)?;
        Ok(updated)
    }
}
