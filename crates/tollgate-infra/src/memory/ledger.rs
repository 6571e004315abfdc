//! Concurrent-map implementation of `BudgetLedger`.
//!
//! Atomicity comes from per-entry locks: every balance mutation happens
//! under its pool's map entry, and every reservation transition under the
//! reservation's entry. At most one map lock is held at a time, and settle
//! paths always claim the reservation before touching the pool.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

use tollgate_core::budget::ledger::BudgetLedger;
use tollgate_types::budget::{
    BudgetPool, Reconciliation, Reservation, ReservationState, ReserveOutcome,
};
use tollgate_types::config::PoolConfig;
use tollgate_types::error::LedgerError;

/// In-process budget ledger.
#[derive(Default)]
pub struct MemoryBudgetLedger {
    pools: DashMap<String, BudgetPool>,
    reservations: DashMap<Uuid, Reservation>,
}

impl MemoryBudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a pool from configuration; mirrors the SQLite
    /// ledger's semantics (new pools start full, existing balances are kept
    /// but clamped to a shrunken limit).
    pub fn ensure_pool(&self, config: &PoolConfig) {
        match self.pools.get_mut(&config.name) {
            Some(mut pool) => {
                pool.monthly_limit = config.monthly_limit;
                pool.current_balance = pool.current_balance.min(config.monthly_limit);
                pool.reset_period = config.reset_period;
                pool.alert_threshold_fraction = config.alert_threshold_fraction;
            }
            None => {
                self.pools.insert(
                    config.name.clone(),
                    BudgetPool {
                        name: config.name.clone(),
                        monthly_limit: config.monthly_limit,
                        current_balance: config.monthly_limit,
                        reset_period: config.reset_period,
                        last_reset_at: Utc::now(),
                        alert_threshold_fraction: config.alert_threshold_fraction,
                    },
                );
            }
        }
    }

    /// Claim an open reservation, moving it to `new_state`.
    fn claim_open(
        &self,
        reservation_id: &Uuid,
        new_state: ReservationState,
    ) -> Result<(String, Decimal), LedgerError> {
        let mut reservation = self
            .reservations
            .get_mut(reservation_id)
            .ok_or(LedgerError::ReservationNotFound(*reservation_id))?;
        if reservation.state != ReservationState::Open {
            return Err(LedgerError::AlreadySettled(*reservation_id));
        }
        reservation.state = new_state;
        Ok((reservation.pool_name.clone(), reservation.amount))
    }
}

impl BudgetLedger for MemoryBudgetLedger {
    async fn try_reserve(
        &self,
        pool: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(amount.to_string()));
        }

        let (reservation, balance_before) = {
            let mut entry = self
                .pools
                .get_mut(pool)
                .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
            if entry.current_balance < amount {
                return Ok(ReserveOutcome::InsufficientFunds {
                    balance: entry.current_balance,
                });
            }
            let balance_before = entry.current_balance;
            entry.current_balance -= amount;
            let reservation = Reservation {
                id: Uuid::now_v7(),
                pool_name: pool.to_string(),
                amount,
                created_at: Utc::now(),
                state: ReservationState::Open,
            };
            (reservation, balance_before)
        };

        self.reservations
            .insert(reservation.id, reservation.clone());
        Ok(ReserveOutcome::Granted {
            reservation,
            balance_before,
        })
    }

    async fn release(&self, reservation_id: &Uuid) -> Result<(), LedgerError> {
        let (pool_name, amount) =
            self.claim_open(reservation_id, ReservationState::Reconciled)?;
        let mut pool = self
            .pools
            .get_mut(&pool_name)
            .ok_or(LedgerError::PoolNotFound(pool_name.clone()))?;
        pool.current_balance = (pool.current_balance + amount).min(pool.monthly_limit);
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
        let (pool_name, reserved) =
            self.claim_open(reservation_id, ReservationState::Reconciled)?;
        let mut pool = self
            .pools
            .get_mut(&pool_name)
            .ok_or(LedgerError::PoolNotFound(pool_name.clone()))?;

        let delta = reserved - actual;
        let mut refunded = Decimal::ZERO;
        let mut extra_debited = Decimal::ZERO;
        let mut overage_accepted = Decimal::ZERO;
        if delta > Decimal::ZERO {
            let headroom = pool.monthly_limit - pool.current_balance;
            refunded = delta.min(headroom);
            pool.current_balance += refunded;
        } else if delta < Decimal::ZERO {
            let overage = -delta;
            extra_debited = overage.min(pool.current_balance);
            pool.current_balance -= extra_debited;
            overage_accepted = overage - extra_debited;
        }

        Ok(Reconciliation {
            reservation_id: *reservation_id,
            pool_name,
            reserved,
            actual,
            refunded,
            extra_debited,
            overage_accepted,
            balance_after: pool.current_balance,
        })
    }

    async fn balance(&self, pool: &str) -> Result<Decimal, LedgerError> {
        self.pools
            .get(pool)
            .map(|p| p.current_balance)
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))
    }

    async fn pool(&self, pool: &str) -> Result<BudgetPool, LedgerError> {
        self.pools
            .get(pool)
            .map(|p| p.clone())
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))
    }

    async fn pools(&self) -> Result<Vec<BudgetPool>, LedgerError> {
        let mut pools: Vec<BudgetPool> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    async fn reset_due_pools(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut reset = Vec::new();
        for mut entry in self.pools.iter_mut() {
            if entry.reset_due(now) {
                entry.current_balance = entry.monthly_limit;
                entry.last_reset_at = now;
                reset.push(entry.name.clone());
            }
        }
        reset.sort();
        Ok(reset)
    }

    async fn expire_stale(&self, ttl: Duration) -> Result<Vec<Reservation>, LedgerError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let stale: Vec<Uuid> = self
            .reservations
            .iter()
            .filter(|r| r.state == ReservationState::Open && r.created_at < cutoff)
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::new();
        for id in stale {
            // Re-check under the entry lock; a worker may have settled it
            // between the scan and now.
            let snapshot = {
                let Some(mut reservation) = self.reservations.get_mut(&id) else {
                    continue;
                };
                if reservation.state != ReservationState::Open {
                    continue;
                }
                reservation.state = ReservationState::Expired;
                reservation.clone()
            };

            if let Some(mut pool) = self.pools.get_mut(&snapshot.pool_name) {
                pool.current_balance =
                    (pool.current_balance + snapshot.amount).min(pool.monthly_limit);
            }
            expired.push(snapshot);
        }
        Ok(expired)
    }

    async fn set_limit(&self, pool: &str, limit: Decimal) -> Result<BudgetPool, LedgerError> {
        if limit.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(limit.to_string()));
        }
        let mut entry = self
            .pools
            .get_mut(pool)
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
        entry.monthly_limit = limit;
        entry.current_balance = entry.current_balance.min(limit);
        Ok(entry.clone())
    }
}
