use thiserror::Error;

use crate::request::{TierAttempt, format_attempts};

/// Errors from budget ledger and spend store operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("budget pool not found: '{0}'")]
    PoolNotFound(String),

    #[error("reservation not found: {0}")]
    ReservationNotFound(uuid::Uuid),

    #[error("reservation {0} already settled")]
    AlreadySettled(uuid::Uuid),

    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from a provider invocation.
///
/// These are recorded against the circuit breaker and recovered by tier
/// fallback; they surface to callers only inside an attempt trail.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0}ms")]
    Timeout(u64),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Terminal routing failures surfaced to the caller.
///
/// Failures within a single tier attempt are recovered locally by falling
/// through to the next tier; only exhaustion of all tiers (or a
/// classification mismatch) produces one of these.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The pre-flight gate rejected every eligible tier. Not retried
    /// automatically: retrying without more budget is pointless.
    #[error("budget exhausted: {}", format_attempts(attempts))]
    BudgetExhausted { attempts: Vec<TierAttempt> },

    /// No tier can serve this request at all (e.g. privacy mode with no
    /// privacy-safe provider for the needed modality). Never downgraded.
    #[error("no eligible tier: {reason}")]
    NoEligibleTier { reason: String },

    /// Every eligible tier was attempted and none succeeded.
    #[error("all providers unavailable: {}", format_attempts(attempts))]
    TiersExhausted { attempts: Vec<TierAttempt> },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RouteError {
    /// The per-tier attempt trail, when this error carries one.
    pub fn attempts(&self) -> &[TierAttempt] {
        match self {
            RouteError::BudgetExhausted { attempts } | RouteError::TiersExhausted { attempts } => {
                attempts
            }
            _ => &[],
        }
    }
}

/// Errors raised while loading or validating router configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AttemptOutcome;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::PoolNotFound("premium".to_string());
        assert_eq!(err.to_string(), "budget pool not found: 'premium'");
    }

    #[test]
    fn test_route_error_includes_attempt_trail() {
        let err = RouteError::BudgetExhausted {
            attempts: vec![TierAttempt {
                tier: 3,
                outcome: AttemptOutcome::BudgetBlocked {
                    estimated: dec!(3.00),
                    balance: dec!(0.50),
                },
            }],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("budget exhausted"));
        assert!(msg.contains("tier 3 blocked"));
        assert_eq!(err.attempts().len(), 1);
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "provider API error (503): overloaded");
    }
}
