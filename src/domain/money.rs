//! Fixed-point currency arithmetic.
//!
//! Every monetary value crossing a boundary (stored price, notional, average
//! cost, balance) is quantized to two decimal places with round-half-up.
//! Storage keeps the same values as integer cents.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of the account currency.
pub const CURRENCY_DP: u32 = 2;

/// Round to currency precision, halves away from zero.
pub fn quantize(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_DP);
    rounded
}

/// price × quantity at currency precision.
pub fn notional(price: Decimal, quantity: i64) -> Decimal {
    quantize(price * Decimal::from(quantity))
}

/// Convert to integer minor units. `None` if the value does not fit in an i64.
pub fn to_cents(value: Decimal) -> Option<i64> {
    i64::try_from(quantize(value).mantissa()).ok()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, CURRENCY_DP)
}

/// Running weighted mean of acquisition cost after buying `qty` more at `price`.
///
/// `total_qty` is `old_qty + qty`, already overflow-checked by the caller.
pub fn weighted_average_cost(
    old_avg: Decimal,
    old_qty: i64,
    price: Decimal,
    qty: i64,
    total_qty: i64,
) -> Decimal {
    let total_cost = old_avg * Decimal::from(old_qty) + price * Decimal::from(qty);
    quantize(total_cost / Decimal::from(total_qty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(dec!(2.345)), dec!(2.35));
        assert_eq!(quantize(dec!(2.344)), dec!(2.34));
        assert_eq!(quantize(dec!(2.355)), dec!(2.36));
        assert_eq!(quantize(dec!(0.005)), dec!(0.01));
    }

    #[test]
    fn quantize_pads_scale() {
        let q = quantize(dec!(50));
        assert_eq!(q.scale(), 2);
        assert_eq!(q.to_string(), "50.00");
    }

    #[test]
    fn notional_is_quantized() {
        assert_eq!(notional(dec!(53.333), 3), dec!(160.00));
        assert_eq!(notional(dec!(0.125), 3), dec!(0.38));
        assert_eq!(notional(dec!(50.00), 10), dec!(500.00));
    }

    #[test]
    fn cents_round_trip_through_quantize() {
        assert_eq!(to_cents(dec!(9500)), Some(950_000));
        assert_eq!(to_cents(dec!(12.345)), Some(1_235));
        assert_eq!(to_cents(dec!(-3.2)), Some(-320));
        assert_eq!(from_cents(5_333), dec!(53.33));
    }

    #[test]
    fn weighted_average_two_lots() {
        let avg = weighted_average_cost(dec!(50.00), 10, dec!(60.00), 5, 15);
        assert_eq!(avg, dec!(53.33));
    }

    #[test]
    fn weighted_average_exact_when_divisible() {
        let avg = weighted_average_cost(dec!(10.00), 1, dec!(20.00), 1, 2);
        assert_eq!(avg, dec!(15.00));
    }
}
