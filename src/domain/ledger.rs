//! Trade execution against the price store and the position ledger.
//!
//! Validation, symbol resolution, and the single price read happen before
//! the ledger is touched. Everything that mutates state runs inside
//! [`LedgerStore::apply_trade`], so a rejected trade leaves no trace.

use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;

use super::account::FundsPolicy;
use super::error::BrokerError;
use super::money::quantize;
use super::portfolio::{summarize, PortfolioSummary, ValuedPosition};
use super::stock::{normalize_symbol, Stock};
use super::trade::{plan_trade, LedgerSnapshot, Side, TradeOrder, TradeReceipt, Transaction};
use crate::ports::ledger_store::LedgerStore;
use crate::ports::price_store::PriceStore;

pub struct LedgerEngine {
    prices: Arc<dyn PriceStore>,
    ledger: Arc<dyn LedgerStore>,
    policy: FundsPolicy,
}

impl LedgerEngine {
    pub fn new(
        prices: Arc<dyn PriceStore>,
        ledger: Arc<dyn LedgerStore>,
        policy: FundsPolicy,
    ) -> Self {
        Self {
            prices,
            ledger,
            policy,
        }
    }

    /// Execute an immediate market order at the latest stored price.
    pub fn execute_trade(
        &self,
        user_id: i64,
        symbol: &str,
        side: Side,
        quantity: i64,
    ) -> Result<TradeReceipt, BrokerError> {
        if quantity <= 0 {
            return Err(BrokerError::InvalidQuantity { quantity });
        }

        let stock = self.resolve(symbol)?;
        let tick = self
            .prices
            .latest_tick(stock.id)?
            .ok_or_else(|| BrokerError::NoPrice {
                symbol: stock.symbol.clone(),
            })?;

        let order = TradeOrder {
            user_id,
            stock_id: stock.id,
            symbol: stock.symbol.clone(),
            side,
            quantity,
            price: quantize(tick.price),
            executed_at: Utc::now(),
        };
        let notional = order.notional();

        debug!(
            "executing {} {} {} @ {} for user {}",
            side, quantity, order.symbol, order.price, user_id
        );

        let policy = self.policy;
        let resulting_balance = self
            .ledger
            .apply_trade(&order, &|snapshot: &LedgerSnapshot| {
                plan_trade(&order, snapshot, policy)
            })?;

        let receipt = TradeReceipt {
            symbol: order.symbol,
            side,
            quantity,
            price: order.price,
            notional,
            resulting_balance,
        };
        info!("user {}: {}", user_id, receipt);
        Ok(receipt)
    }

    /// Holdings valued at the latest stored prices.
    pub fn portfolio(&self, user_id: i64) -> Result<PortfolioSummary, BrokerError> {
        let balance = self.ledger.balance(user_id)?;
        let stocks = self.prices.list_stocks()?;

        let mut valued = Vec::new();
        for position in self.ledger.positions(user_id)? {
            let symbol = stocks
                .iter()
                .find(|s| s.id == position.stock_id)
                .map(|s| s.symbol.clone())
                .unwrap_or_else(|| position.stock_id.to_string());
            let last_price = self
                .prices
                .latest_tick(position.stock_id)?
                .map(|t| quantize(t.price));
            valued.push(ValuedPosition {
                symbol,
                position,
                last_price,
            });
        }

        Ok(summarize(balance, valued))
    }

    pub fn history(&self, user_id: i64) -> Result<Vec<Transaction>, BrokerError> {
        self.ledger.transactions(user_id)
    }

    fn resolve(&self, symbol: &str) -> Result<Stock, BrokerError> {
        let normalized = normalize_symbol(symbol).ok_or_else(|| BrokerError::UnknownSymbol {
            symbol: symbol.to_string(),
        })?;
        self.prices
            .find_stock(&normalized)?
            .ok_or(BrokerError::UnknownSymbol { symbol: normalized })
    }
}
