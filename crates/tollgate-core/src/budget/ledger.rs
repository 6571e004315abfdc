//! Budget ledger and spend store ports.
//!
//! Implementations live in `tollgate-infra`. The central correctness
//! requirement: every balance mutation is a single atomic operation against
//! the shared store -- never read-compare-write across two round trips.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use tollgate_types::budget::{BudgetPool, Reconciliation, Reservation, ReserveOutcome};
use tollgate_types::error::LedgerError;

/// Durable, atomically-mutable store of named budget pools.
///
/// Uses RPITIT with explicit `Send` bounds so executors can be spawned onto
/// multi-threaded runtimes.
pub trait BudgetLedger: Send + Sync {
    /// Atomically hold `amount` from `pool`, or report insufficient funds.
    ///
    /// Two simultaneous calls that would jointly overdraw the pool must not
    /// both succeed; there is no partial reservation.
    fn try_reserve(
        &self,
        pool: &str,
        amount: Decimal,
    ) -> impl Future<Output = Result<ReserveOutcome, LedgerError>> + Send;

    /// Atomically return the full reserved amount to the pool and mark the
    /// reservation reconciled (used when the call never executed).
    fn release(
        &self,
        reservation_id: &Uuid,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Settle a reservation against the actual cost: refund the difference
    /// (clamped at the pool limit) or debit the overage (clamped at zero).
    ///
    /// Settling a reservation that is not open fails with
    /// [`LedgerError::AlreadySettled`]; it never double-refunds or
    /// double-charges.
    fn reconcile(
        &self,
        reservation_id: &Uuid,
        actual: Decimal,
    ) -> impl Future<Output = Result<Reconciliation, LedgerError>> + Send;

    /// Current balance of a pool.
    fn balance(&self, pool: &str) -> impl Future<Output = Result<Decimal, LedgerError>> + Send;

    /// Full pool record (for alert evaluation).
    fn pool(&self, pool: &str) -> impl Future<Output = Result<BudgetPool, LedgerError>> + Send;

    /// All configured pools.
    fn pools(&self) -> impl Future<Output = Result<Vec<BudgetPool>, LedgerError>> + Send;

    /// Reset every pool whose period has elapsed back to its full limit.
    ///
    /// Idempotent within a period: the reset compares-and-sets on
    /// `last_reset_at`, so concurrent invocations reset each pool once.
    /// Returns the names of the pools that were reset.
    fn reset_due_pools(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<String>, LedgerError>> + Send;

    /// Expire open reservations older than `ttl` and refund their holds.
    ///
    /// Reclaims budget leaked by crashed or cancelled workers. Returns the
    /// expired reservations so the caller can log each leak.
    fn expire_stale(
        &self,
        ttl: Duration,
    ) -> impl Future<Output = Result<Vec<Reservation>, LedgerError>> + Send;

    /// Administrative limit change. The balance is clamped to a shrunken
    /// limit but never topped up by a raised one; raised headroom becomes
    /// available at the next period reset. Returns the updated pool.
    fn set_limit(
        &self,
        pool: &str,
        limit: Decimal,
    ) -> impl Future<Output = Result<BudgetPool, LedgerError>> + Send;
}

/// Period spend counters and flags behind the documented key layout.
///
/// All keys are built by `tollgate_types::spend`; values are string-encoded
/// decimals at this interface regardless of how the backend stores them.
pub trait SpendStore: Send + Sync {
    /// Atomically add `amount` to the counter at `key`, creating it with the
    /// given TTL on first write (and after expiry). Returns the new value.
    fn incr(
        &self,
        key: &str,
        amount: Decimal,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<Decimal, LedgerError>> + Send;

    /// Atomically claim a flag: true iff the key was absent (or expired).
    fn set_if_absent(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Read a counter, treating expired keys as absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Decimal>, LedgerError>> + Send;

    /// Administrative overwrite (no TTL); used for `budget:*:limit` keys.
    fn set(
        &self,
        key: &str,
        value: Decimal,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}
