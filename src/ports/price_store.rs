//! Price storage port trait.

use crate::domain::error::BrokerError;
use crate::domain::stock::{PriceTick, Stock};

pub trait PriceStore: Send + Sync {
    /// All tracked stocks, ordered by symbol.
    fn list_stocks(&self) -> Result<Vec<Stock>, BrokerError>;

    fn find_stock(&self, symbol: &str) -> Result<Option<Stock>, BrokerError>;

    /// Insert the ticks in one storage transaction. Ticks colliding with an
    /// existing (stock, recorded_at) pair are dropped. Returns the number
    /// actually inserted.
    fn insert_ticks(&self, ticks: &[PriceTick]) -> Result<usize, BrokerError>;

    fn latest_tick(&self, stock_id: i64) -> Result<Option<PriceTick>, BrokerError>;
}
