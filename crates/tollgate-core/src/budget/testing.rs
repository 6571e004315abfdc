//! In-process ledger and spend-store fakes shared by the crate's tests.
//!
//! Each operation takes one lock, so the atomicity contract of the ports
//! holds well enough for single-process test scenarios. The production
//! implementations live in `tollgate-infra`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use tollgate_types::budget::{
    BudgetPool, Reconciliation, Reservation, ReservationState, ReserveOutcome, ResetPeriod,
};
use tollgate_types::error::LedgerError;

use super::ledger::{BudgetLedger, SpendStore};

#[derive(Default)]
struct LedgerState {
    pools: HashMap<String, BudgetPool>,
    reservations: HashMap<Uuid, Reservation>,
}

/// Mutex-backed ledger fake.
#[derive(Default)]
pub(crate) struct TestLedger {
    state: Mutex<LedgerState>,
}

impl TestLedger {
    pub(crate) fn new(pools: Vec<BudgetPool>) -> Self {
        let mut state = LedgerState::default();
        for pool in pools {
            state.pools.insert(pool.name.clone(), pool);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub(crate) fn single_pool(name: &str, balance: Decimal) -> Self {
        Self::new(vec![BudgetPool {
            name: name.to_string(),
            monthly_limit: balance,
            current_balance: balance,
            reset_period: ResetPeriod::Monthly,
            last_reset_at: Utc::now(),
            alert_threshold_fraction: 0.9,
        }])
    }

    pub(crate) fn pool_with_limit(name: &str, limit: Decimal, balance: Decimal) -> Self {
        Self::new(vec![BudgetPool {
            name: name.to_string(),
            monthly_limit: limit,
            current_balance: balance,
            reset_period: ResetPeriod::Monthly,
            last_reset_at: Utc::now(),
            alert_threshold_fraction: 0.9,
        }])
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BudgetLedger for TestLedger {
    async fn try_reserve(
        &self,
        pool: &str,
        amount: Decimal,
    ) -> Result<ReserveOutcome, LedgerError> {
        let mut state = self.lock();
        let entry = state
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
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(ReserveOutcome::Granted {
            reservation,
            balance_before,
        })
    }

    async fn release(&self, reservation_id: &Uuid) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .ok_or(LedgerError::ReservationNotFound(*reservation_id))?;
        if reservation.state != ReservationState::Open {
            return Err(LedgerError::AlreadySettled(*reservation_id));
        }
        reservation.state = ReservationState::Reconciled;
        let (pool_name, amount) = (reservation.pool_name.clone(), reservation.amount);

        let pool = state
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
        let mut state = self.lock();
        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .ok_or(LedgerError::ReservationNotFound(*reservation_id))?;
        if reservation.state != ReservationState::Open {
            return Err(LedgerError::AlreadySettled(*reservation_id));
        }
        reservation.state = ReservationState::Reconciled;
        let (pool_name, reserved) = (reservation.pool_name.clone(), reservation.amount);

        let pool = state
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
        let state = self.lock();
        state
            .pools
            .get(pool)
            .map(|p| p.current_balance)
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))
    }

    async fn pool(&self, pool: &str) -> Result<BudgetPool, LedgerError> {
        let state = self.lock();
        state
            .pools
            .get(pool)
            .cloned()
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))
    }

    async fn pools(&self) -> Result<Vec<BudgetPool>, LedgerError> {
        Ok(self.lock().pools.values().cloned().collect())
    }

    async fn reset_due_pools(&self, now: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let mut state = self.lock();
        let mut reset = Vec::new();
        for pool in state.pools.values_mut() {
            if pool.reset_due(now) {
                pool.current_balance = pool.monthly_limit;
                pool.last_reset_at = now;
                reset.push(pool.name.clone());
            }
        }
        Ok(reset)
    }

    async fn expire_stale(&self, ttl: Duration) -> Result<Vec<Reservation>, LedgerError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut state = self.lock();
        let stale: Vec<Uuid> = state
            .reservations
            .values()
            .filter(|r| r.state == ReservationState::Open && r.created_at < cutoff)
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::new();
        for id in stale {
            let (pool_name, amount) = {
                let reservation = state
                    .reservations
                    .get_mut(&id)
                    .ok_or(LedgerError::ReservationNotFound(id))?;
                reservation.state = ReservationState::Expired;
                (reservation.pool_name.clone(), reservation.amount)
            };
            if let Some(pool) = state.pools.get_mut(&pool_name) {
                pool.current_balance = (pool.current_balance + amount).min(pool.monthly_limit);
            }
            if let Some(reservation) = state.reservations.get(&id) {
                expired.push(reservation.clone());
            }
        }
        Ok(expired)
    }

    async fn set_limit(&self, pool: &str, limit: Decimal) -> Result<BudgetPool, LedgerError> {
        if limit.is_sign_negative() {
            return Err(LedgerError::AmountOutOfRange(limit.to_string()));
        }
        let mut state = self.lock();
        let entry = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| LedgerError::PoolNotFound(pool.to_string()))?;
        entry.monthly_limit = limit;
        entry.current_balance = entry.current_balance.min(limit);
        Ok(entry.clone())
    }
}

/// Mutex-backed spend-store fake (TTLs tracked but only expired on read).
#[derive(Default)]
pub(crate) struct TestSpendStore {
    entries: Mutex<HashMap<String, (Decimal, Option<std::time::Instant>)>>,
}

impl TestSpendStore {
    fn expired(deadline: &Option<std::time::Instant>) -> bool {
        deadline.is_some_and(|d| std::time::Instant::now() >= d)
    }
}

impl SpendStore for TestSpendStore {
    async fn incr(
        &self,
        key: &str,
        amount: Decimal,
        ttl: Option<Duration>,
    ) -> Result<Decimal, LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = ttl.map(|t| std::time::Instant::now() + t);
        let entry = entries.entry(key.to_string()).or_insert((Decimal::ZERO, deadline));
        if Self::expired(&entry.1) {
            *entry = (Decimal::ZERO, deadline);
        }
        entry.0 += amount;
        Ok(entry.0)
    }

    async fn set_if_absent(&self, key: &str, ttl: Option<Duration>) -> Result<bool, LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = ttl.map(|t| std::time::Instant::now() + t);
        match entries.get(key) {
            Some((_, existing)) if !Self::expired(existing) => Ok(false),
            _ => {
                entries.insert(key.to_string(), (Decimal::ONE, deadline));
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Decimal>, LedgerError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| !Self::expired(deadline))
            .map(|(value, _)| *value))
    }

    async fn set(&self, key: &str, value: Decimal) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value, None));
        Ok(())
    }
}
