//! Spend-counter key layout.
//!
//! Bit-exact key formats for the external budget-state store:
//!
//! - `cost:{period}:{entity_type}:{entity_id}` -- string-encoded decimal,
//!   atomic increment only, TTL = period length.
//! - `budget:{entity_id}:{period}:limit` -- string-encoded decimal, no TTL,
//!   administrative set only.
//! - `alert:{period}:{entity_id}:{threshold}` -- set-if-absent flag with
//!   TTL = period length; guarantees at most one alert per threshold per
//!   period.

use std::fmt;

use crate::budget::ResetPeriod;

/// What kind of entity a spend counter is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pool,
    Provider,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Pool => write!(f, "pool"),
            EntityKind::Provider => write!(f, "provider"),
        }
    }
}

/// Key for a period spend counter: `cost:{period}:{entity_type}:{entity_id}`.
pub fn cost_key(period: ResetPeriod, kind: EntityKind, entity_id: &str) -> String {
    format!("cost:{period}:{kind}:{entity_id}")
}

/// Key for an administrative limit: `budget:{entity_id}:{period}:limit`.
pub fn limit_key(entity_id: &str, period: ResetPeriod) -> String {
    format!("budget:{entity_id}:{period}:limit")
}

/// Key for an alert dedup flag: `alert:{period}:{entity_id}:{threshold}`.
pub fn alert_key(period: ResetPeriod, entity_id: &str, threshold: f64) -> String {
    format!("alert:{period}:{entity_id}:{threshold}")
}
