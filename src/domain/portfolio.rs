//! Portfolio valuation at the latest known prices.

use rust_decimal::Decimal;

use super::money::quantize;
use super::position::Position;

/// A position paired with its symbol and latest price, if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedPosition {
    pub symbol: String,
    pub position: Position,
    pub last_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub last_price: Option<Decimal>,
    pub market_value: Decimal,
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub balance: Decimal,
    pub holdings: Vec<Holding>,
    pub holdings_value: Decimal,
    pub total_worth: Decimal,
}

/// Holdings without a price contribute nothing to the holdings value.
pub fn summarize(balance: Decimal, positions: Vec<ValuedPosition>) -> PortfolioSummary {
    let mut holdings: Vec<Holding> = positions
        .into_iter()
        .map(|vp| {
            let market_value = vp
                .last_price
                .map(|p| vp.position.market_value(p))
                .unwrap_or_else(|| quantize(Decimal::ZERO));
            Holding {
                unrealized_pnl: vp.last_price.map(|p| vp.position.unrealized_pnl(p)),
                symbol: vp.symbol,
                quantity: vp.position.quantity,
                average_cost: vp.position.average_cost,
                last_price: vp.last_price,
                market_value,
            }
        })
        .collect();
    holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let holdings_value = quantize(holdings.iter().map(|h| h.market_value).sum());

    PortfolioSummary {
        balance,
        total_worth: quantize(balance + holdings_value),
        holdings,
        holdings_value,
    }
}
