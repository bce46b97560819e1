//! Trade sides, audit records, and the weighted-average-cost planning step.
//!
//! [`plan_trade`] is pure: given the locked position and balance it decides
//! every write a trade makes. The storage adapter applies the returned
//! [`LedgerEffect`] inside the same transaction that read the snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use super::account::FundsPolicy;
use super::error::BrokerError;
use super::money::{notional, weighted_average_cost};
use super::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side '{other}' (expected buy or sell)")),
        }
    }
}

/// Append-only audit row, one per executed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub stock_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub price: Decimal,
    pub side: Side,
    pub executed_at: DateTime<Utc>,
}

/// What a successful `execute_trade` reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeReceipt {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub notional: Decimal,
    pub resulting_balance: Decimal,
}

impl fmt::Display for TradeReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.side {
            Side::Buy => "Bought",
            Side::Sell => "Sold",
        };
        write!(
            f,
            "{} {} {} @ {} (notional {}).",
            verb, self.quantity, self.symbol, self.price, self.notional
        )
    }
}

/// A single trade request with its execution price already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    pub user_id: i64,
    pub stock_id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl TradeOrder {
    pub fn notional(&self) -> Decimal {
        notional(self.price, self.quantity)
    }
}

/// State read under the position lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub position: Option<Position>,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Open { quantity: i64, average_cost: Decimal },
    Update { quantity: i64, average_cost: Decimal },
    Close,
}

/// Every write one trade performs.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEffect {
    pub position: PositionChange,
    /// Signed: negative for buys, positive for sells.
    pub balance_delta: Decimal,
}

pub fn plan_trade(
    order: &TradeOrder,
    snapshot: &LedgerSnapshot,
    policy: FundsPolicy,
) -> Result<LedgerEffect, BrokerError> {
    let notional = order.notional();

    match order.side {
        Side::Buy => {
            if policy == FundsPolicy::Reject && notional > snapshot.balance {
                return Err(BrokerError::InsufficientFunds {
                    required: notional,
                    available: snapshot.balance,
                });
            }

            let position = match &snapshot.position {
                None => PositionChange::Open {
                    quantity: order.quantity,
                    average_cost: order.price,
                },
                Some(pos) => {
                    let quantity = pos.quantity.checked_add(order.quantity).ok_or_else(|| {
                        BrokerError::QuantityOverflow {
                            symbol: order.symbol.clone(),
                        }
                    })?;
                    PositionChange::Update {
                        quantity,
                        average_cost: weighted_average_cost(
                            pos.average_cost,
                            pos.quantity,
                            order.price,
                            order.quantity,
                            quantity,
                        ),
                    }
                }
            };

            Ok(LedgerEffect {
                position,
                balance_delta: -notional,
            })
        }
        Side::Sell => {
            let pos = match &snapshot.position {
                Some(pos) if pos.can_sell(order.quantity) => pos,
                other => {
                    return Err(BrokerError::InsufficientHoldings {
                        symbol: order.symbol.clone(),
                        held: other.as_ref().map_or(0, |p| p.quantity),
                        requested: order.quantity,
                    });
                }
            };

            let remaining = pos.quantity - order.quantity;
            let position = if remaining == 0 {
                PositionChange::Close
            } else {
                PositionChange::Update {
                    quantity: remaining,
                    average_cost: pos.average_cost,
                }
            };

            Ok(LedgerEffect {
                position,
                balance_delta: notional,
            })
        }
    }
}
