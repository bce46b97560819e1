//! Ledger storage port trait.

use rust_decimal::Decimal;

use crate::domain::error::BrokerError;
use crate::domain::position::Position;
use crate::domain::trade::{LedgerEffect, LedgerSnapshot, TradeOrder, Transaction};

/// Decides the writes for one trade from the locked snapshot.
pub type TradePlanner<'a> = dyn Fn(&LedgerSnapshot) -> Result<LedgerEffect, BrokerError> + 'a;

pub trait LedgerStore: Send + Sync {
    /// Apply one trade atomically.
    ///
    /// Implementations must lock the (user, stock) position before reading
    /// the snapshot, call `planner` exactly once, and then commit the
    /// transaction row, position change, and balance delta together or not
    /// at all. Returns the balance after the trade.
    fn apply_trade(
        &self,
        order: &TradeOrder,
        planner: &TradePlanner<'_>,
    ) -> Result<Decimal, BrokerError>;

    fn balance(&self, user_id: i64) -> Result<Decimal, BrokerError>;

    fn position(&self, user_id: i64, stock_id: i64) -> Result<Option<Position>, BrokerError>;

    fn positions(&self, user_id: i64) -> Result<Vec<Position>, BrokerError>;

    /// Newest first.
    fn transactions(&self, user_id: i64) -> Result<Vec<Transaction>, BrokerError>;
}
