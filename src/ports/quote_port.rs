//! External quote source port trait.

use rust_decimal::Decimal;

pub trait QuoteSource: Send + Sync {
    /// Latest price for `symbol`, or `None` on any per-symbol failure.
    /// Implementations log the cause themselves and never fail the caller.
    fn fetch_price(&self, symbol: &str) -> Option<Decimal>;
}
