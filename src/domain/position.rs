//! Open holdings with weighted-average cost.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::money::{notional, quantize};

/// A user's holding in one stock. Rows only exist while `quantity > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub user_id: i64,
    pub stock_id: i64,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        notional(self.average_cost, self.quantity)
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        notional(price, self.quantity)
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        quantize(self.market_value(price) - self.cost_basis())
    }

    pub fn can_sell(&self, quantity: i64) -> bool {
        quantity <= self.quantity
    }
}
