//! Budget threshold alert events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event emitted when a pool crosses an alert threshold.
///
/// Delivered at most once per threshold per period. The transport to the
/// external notification collaborator (email/webhook) is out of scope; the
/// dispatcher hands these to an mpsc channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub pool: String,
    pub balance: Decimal,
    pub limit: Decimal,
    /// Fraction of the limit consumed, 0.0..=1.0.
    pub percentage: f64,
    /// The threshold that was crossed (e.g. 0.9).
    pub threshold: f64,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_alert_serializes() {
        let alert = BudgetAlert {
            pool: "premium".to_string(),
            balance: dec!(1.00),
            limit: dec!(10.00),
            percentage: 0.9,
            threshold: 0.9,
            at: Utc::now(),
        };
        let rendered = toml::to_string(&alert).unwrap();
        assert!(rendered.contains("pool = \"premium\""));
        assert!(rendered.contains("threshold = 0.9"));
    }
}
