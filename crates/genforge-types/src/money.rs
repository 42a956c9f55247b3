//! Money helpers.
//!
//! Amounts are [`Decimal`] in memory and integer cents in the store.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Cents per currency unit.
const CENTS_PER_UNIT: i64 = 100;

/// Convert an amount to whole cents, rounding half away from zero.
///
/// Saturates at the `i64` bounds.
pub fn to_cents(amount: Decimal) -> i64 {
    let rounded = amount.round_dp_with_strategy(
        2,
        rust_decimal::RoundingStrategy::MidpointAwayFromZero,
    );
    rounded
        .checked_mul(Decimal::from(CENTS_PER_UNIT))
        .and_then(|cents| cents.to_i64())
        .unwrap_or(if amount.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
}

/// Convert whole cents back to an amount.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// `base × multiplier^steps`, saturating at [`Decimal::MAX`].
pub fn compound(base: Decimal, multiplier: Decimal, steps: u32) -> Decimal {
    let mut value = base;
    for _ in 0..steps {
        match value.checked_mul(multiplier) {
            Some(next) => value = next,
            None => return Decimal::MAX,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn cents_roundtrip() {
        assert_eq!(to_cents(dec!(24.3)), 2430);
        assert_eq!(from_cents(2430), dec!(24.30));
    }

    #[test]
    fn cents_round_half_away_from_zero() {
        assert_eq!(to_cents(dec!(0.005)), 1);
        assert_eq!(to_cents(dec!(-0.005)), -1);
        assert_eq!(to_cents(dec!(1.004)), 100);
    }

    #[test]
    fn compound_growth() {
        assert_eq!(compound(dec!(10), dec!(1.5), 0), dec!(10));
        assert_eq!(compound(dec!(10), dec!(1.5), 2), dec!(22.5));
    }

    #[test]
    fn compound_saturates() {
        assert_eq!(compound(Decimal::MAX, dec!(2), 3), Decimal::MAX);
    }
}
