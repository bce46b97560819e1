//! Stock reference data and price ticks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stock {
    pub id: i64,
    pub symbol: String,
    pub name: String,
}

/// A stock not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStock {
    pub symbol: String,
    pub name: String,
}

impl NewStock {
    /// Symbols are stored trimmed and upper-cased; the name defaults to the symbol.
    pub fn new(symbol: &str, name: &str) -> Option<Self> {
        let symbol = normalize_symbol(symbol)?;
        let name = match name.trim() {
            "" => symbol.clone(),
            n => n.to_string(),
        };
        Some(NewStock { symbol, name })
    }
}

pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// One observed price for a stock. At most one tick exists per
/// (stock, recorded_at).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub stock_id: i64,
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stock_normalizes_symbol() {
        let s = NewStock::new("  aapl ", "Apple Inc.").unwrap();
        assert_eq!(s.symbol, "AAPL");
        assert_eq!(s.name, "Apple Inc.");
    }

    #[test]
    fn new_stock_defaults_name_to_symbol() {
        let s = NewStock::new("msft", "   ").unwrap();
        assert_eq!(s.name, "MSFT");
    }

    #[test]
    fn new_stock_rejects_blank_symbol() {
        assert!(NewStock::new("  ", "Nothing").is_none());
    }
}
