//! Concurrent-map implementation of `SpendStore`.
//!
//! Counters live under their key's entry lock, so increments and
//! set-if-absent claims are atomic. Expired entries are lazily replaced on
//! the next access rather than swept.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

use tollgate_core::budget::ledger::SpendStore;
use tollgate_types::error::LedgerError;

#[derive(Debug, Clone)]
struct Counter {
    value: Decimal,
    expires_at: Option<Instant>,
}

impl Counter {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process spend counters and alert flags.
#[derive(Default)]
pub struct MemorySpendStore {
    entries: DashMap<String, Counter>,
}

impl MemorySpendStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|t| Instant::now() + t)
}

impl SpendStore for MemorySpendStore {
    async fn incr(
        &self,
        key: &str,
        amount: Decimal,
        ttl: Option<Duration>,
    ) -> Result<Decimal, LedgerError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.expired() {
                    *counter = Counter {
                        value: amount,
                        expires_at: deadline(ttl),
                    };
                } else {
                    counter.value += amount;
                }
                Ok(counter.value)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Counter {
                    value: amount,
                    expires_at: deadline(ttl),
                });
                Ok(amount)
            }
        }
    }

    async fn set_if_absent(&self, key: &str, ttl: Option<Duration>) -> Result<bool, LedgerError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired() {
                    *occupied.get_mut() = Counter {
                        value: Decimal::ONE,
                        expires_at: deadline(ttl),
                    };
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Counter {
                    value: Decimal::ONE,
                    expires_at: deadline(ttl),
                });
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Decimal>, LedgerError> {
        Ok(self
            .entries
            .get(key)
            .filter(|counter| !counter.expired())
            .map(|counter| counter.value))
    }

    async fn set(&self, key: &str, value: Decimal) -> Result<(), LedgerError> {
        self.entries.insert(
            key.to_string(),
            Counter {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }
}
