//! Budget pool, reservation and pre-flight check types.
//!
//! A [`BudgetPool`] is a named, periodically-reset spending allowance.
//! A [`Reservation`] is a provisional hold against a pool, created before a
//! provider call and settled afterward by reconciliation, release or expiry.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// How often a budget pool resets to its full limit.
///
/// Closed set of periods; the TTL seconds match the documented key layout
/// exactly (daily 86400, weekly 604800, monthly 2592000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ResetPeriod {
    /// Period length in seconds, used both for pool resets and key TTLs.
    pub fn ttl_secs(&self) -> u64 {
        match self {
            ResetPeriod::Daily => 86_400,
            ResetPeriod::Weekly => 604_800,
            ResetPeriod::Monthly => 2_592_000,
        }
    }

    /// Period length as a `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.ttl_secs())
    }
}

impl fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetPeriod::Daily => write!(f, "daily"),
            ResetPeriod::Weekly => write!(f, "weekly"),
            ResetPeriod::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for ResetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(ResetPeriod::Daily),
            "weekly" => Ok(ResetPeriod::Weekly),
            "monthly" => Ok(ResetPeriod::Monthly),
            other => Err(format!("invalid reset period: '{other}'")),
        }
    }
}

/// A named spending allowance with a periodic reset.
///
/// Invariant: `0 <= current_balance <= monthly_limit` at all observable
/// times. The ledger enforces this with clamped atomic mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPool {
    pub name: String,
    pub monthly_limit: Decimal,
    pub current_balance: Decimal,
    pub reset_period: ResetPeriod,
    pub last_reset_at: DateTime<Utc>,
    pub alert_threshold_fraction: f64,
}

impl BudgetPool {
    /// Fraction of the limit consumed so far (0.0 when the limit is zero).
    pub fn consumed_fraction(&self) -> f64 {
        if self.monthly_limit.is_zero() {
            return 0.0;
        }
        let consumed = self.monthly_limit - self.current_balance;
        let ratio = consumed / self.monthly_limit;
        ratio.to_f64().unwrap_or(0.0)
    }

    /// Whether this pool is due for a reset at `now`.
    pub fn reset_due(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_reset_at);
        elapsed.num_seconds() >= self.reset_period.ttl_secs() as i64
    }
}

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Open,
    Reconciled,
    Expired,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Open => write!(f, "open"),
            ReservationState::Reconciled => write!(f, "reconciled"),
            ReservationState::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for ReservationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(ReservationState::Open),
            "reconciled" => Ok(ReservationState::Reconciled),
            "expired" => Ok(ReservationState::Expired),
            other => Err(format!("invalid reservation state: '{other}'")),
        }
    }
}

/// A provisional hold against a budget pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub pool_name: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub state: ReservationState,
}

/// Result of an atomic `try_reserve` against a pool.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// Funds were held; the reservation must be settled later.
    /// `balance_before` is the balance the atomic decrement acted on,
    /// captured inside the grant so concurrent reserves cannot skew it.
    Granted {
        reservation: Reservation,
        balance_before: Decimal,
    },
    /// The pool balance was below the requested amount. No partial hold.
    InsufficientFunds { balance: Decimal },
}

/// Result of settling a reservation against the actual cost.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub reservation_id: Uuid,
    pub pool_name: String,
    pub reserved: Decimal,
    pub actual: Decimal,
    /// Amount returned to the pool (actual < reserved).
    pub refunded: Decimal,
    /// Extra amount debited from the pool (actual > reserved).
    pub extra_debited: Decimal,
    /// Overage that could not be debited because the balance hit the floor.
    /// The call already executed, so this is accepted and logged.
    pub overage_accepted: Decimal,
    pub balance_after: Decimal,
}

/// Outcome of a pre-flight budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckResult {
    Pass,
    Block,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResult::Pass => write!(f, "PASS"),
            CheckResult::Block => write!(f, "BLOCK"),
        }
    }
}

/// Ephemeral record of a pre-flight budget gate decision.
///
/// Logged for audit, not persisted long-term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub query_id: Uuid,
    pub tier_requested: u32,
    pub estimated_cost: Decimal,
    pub pool_name: String,
    pub balance_before: Decimal,
    pub result: CheckResult,
    pub reservation_id: Option<Uuid>,
}
