//! Decimal <-> integer micro-unit conversion.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use tollgate_types::error::LedgerError;

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Convert a decimal amount to integer micro-units, rejecting values that
/// do not fit (negative amounts are allowed; callers decide their policy).
pub(crate) fn to_micros(amount: Decimal) -> Result<i64, LedgerError> {
    let scaled = (amount * Decimal::from(MICROS_PER_UNIT)).round();
    scaled
        .to_i64()
        .ok_or_else(|| LedgerError::AmountOutOfRange(amount.to_string()))
}

/// Convert stored micro-units back to a decimal amount (scale 6).
pub(crate) fn from_micros(micros: i64) -> Decimal {
    Decimal::new(micros, 6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_roundtrip() {
        for amount in [dec!(0), dec!(0.000001), dec!(3.14), dec!(40.00), dec!(-1.50)] {
            assert_eq!(from_micros(to_micros(amount).unwrap()), amount.round_dp(6));
        }
    }

    #[test]
    fn test_sub_micro_amounts_round() {
        assert_eq!(to_micros(dec!(0.0000004)).unwrap(), 0);
        assert_eq!(to_micros(dec!(0.0000006)).unwrap(), 1);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let huge = Decimal::MAX;
        assert!(matches!(
            to_micros(huge),
            Err(LedgerError::AmountOutOfRange(_))
        ));
    }
}
