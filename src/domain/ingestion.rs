//! Periodic price ingestion.
//!
//! One run is a cycle: every tracked stock is quoted in sequence (the quote
//! source does its own pacing), every successful price is stamped with the
//! single timestamp captured when the cycle began, and the batch is written
//! in chunks of at most `batch_size` ticks per storage transaction. Failed
//! symbols are logged and skipped; only storage errors fail the run.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use super::error::BrokerError;
use super::money::quantize;
use super::scheduler::Job;
use super::stock::PriceTick;
use crate::ports::price_store::PriceStore;
use crate::ports::quote_port::QuoteSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub symbols: usize,
    pub fetched: usize,
    pub persisted: usize,
    pub failed: Vec<String>,
}

pub struct PriceIngestionJob {
    store: Arc<dyn PriceStore>,
    quotes: Arc<dyn QuoteSource>,
    batch_size: usize,
    pacing: Option<Duration>,
}

impl PriceIngestionJob {
    pub fn new(store: Arc<dyn PriceStore>, quotes: Arc<dyn QuoteSource>, batch_size: usize) -> Self {
        Self {
            store,
            quotes,
            batch_size: batch_size.max(1),
            pacing: None,
        }
    }

    /// Spacing the quote source enforces between requests. Only used to
    /// report how long a cycle should take.
    pub fn with_pacing(mut self, spacing: Duration) -> Self {
        self.pacing = Some(spacing);
        self
    }

    pub fn run(&self) -> Result<IngestionReport, BrokerError> {
        self.run_at(Utc::now())
    }

    /// Run one cycle stamped with `cycle_time`.
    pub fn run_at(&self, cycle_time: DateTime<Utc>) -> Result<IngestionReport, BrokerError> {
        let stocks = self.store.list_stocks()?;
        if stocks.is_empty() {
            info!("No symbols to fetch.");
            return Ok(IngestionReport::default());
        }

        match self.pacing {
            Some(spacing) => info!(
                "Fetching {} symbols for cycle {} (about {}s)",
                stocks.len(),
                cycle_time.format("%Y-%m-%d %H:%M:%S"),
                (spacing * stocks.len() as u32).as_secs()
            ),
            None => info!(
                "Fetching {} symbols for cycle {}",
                stocks.len(),
                cycle_time.format("%Y-%m-%d %H:%M:%S")
            ),
        }

        let mut report = IngestionReport {
            symbols: stocks.len(),
            ..IngestionReport::default()
        };
        let mut batch: Vec<PriceTick> = Vec::with_capacity(self.batch_size);

        for stock in &stocks {
            let price = match self.quotes.fetch_price(&stock.symbol).map(quantize) {
                Some(p) if p > Decimal::ZERO => p,
                Some(p) => {
                    warn!("{}: price {} rounds to a non-positive value", stock.symbol, p);
                    report.failed.push(stock.symbol.clone());
                    continue;
                }
                None => {
                    report.failed.push(stock.symbol.clone());
                    continue;
                }
            };

            report.fetched += 1;
            batch.push(PriceTick {
                stock_id: stock.id,
                price,
                recorded_at: cycle_time,
            });

            if batch.len() >= self.batch_size {
                report.persisted += self.flush(&mut batch)?;
            }
        }

        if !batch.is_empty() {
            report.persisted += self.flush(&mut batch)?;
        }

        info!(
            "Price fetch cycle complete: {} fetched, {} persisted, {} failed",
            report.fetched,
            report.persisted,
            report.failed.len()
        );
        Ok(report)
    }

    fn flush(&self, batch: &mut Vec<PriceTick>) -> Result<usize, BrokerError> {
        let inserted = self.store.insert_ticks(batch)?;
        if inserted < batch.len() {
            debug!(
                "dropped {} duplicate ticks for this cycle",
                batch.len() - inserted
            );
        }
        debug!("flushed {} ticks", inserted);
        batch.clear();
        Ok(inserted)
    }
}

impl Job for PriceIngestionJob {
    fn name(&self) -> &str {
        "fetch_prices"
    }

    fn execute(&self) -> Result<(), BrokerError> {
        self.run().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stock::Stock;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        stocks: Vec<Stock>,
        ticks: Mutex<Vec<PriceTick>>,
        insert_calls: Mutex<Vec<usize>>,
    }

    impl MemoryStore {
        fn with_symbols(symbols: &[&str]) -> Self {
            MemoryStore {
                stocks: symbols
                    .iter()
                    .enumerate()
                    .map(|(i, s)| Stock {
                        id: i as i64 + 1,
                        symbol: s.to_string(),
                        name: s.to_string(),
                    })
                    .collect(),
                ..MemoryStore::default()
            }
        }
    }

    impl PriceStore for MemoryStore {
        fn list_stocks(&self) -> Result<Vec<Stock>, BrokerError> {
            Ok(self.stocks.clone())
        }

        fn find_stock(&self, symbol: &str) -> Result<Option<Stock>, BrokerError> {
            Ok(self.stocks.iter().find(|s| s.symbol == symbol).cloned())
        }

        fn insert_ticks(&self, ticks: &[PriceTick]) -> Result<usize, BrokerError> {
            self.insert_calls.lock().unwrap().push(ticks.len());
            let mut stored = self.ticks.lock().unwrap();
            let mut seen: HashSet<(i64, DateTime<Utc>)> =
                stored.iter().map(|t| (t.stock_id, t.recorded_at)).collect();
            let mut inserted = 0;
            for tick in ticks {
                if seen.insert((tick.stock_id, tick.recorded_at)) {
                    stored.push(tick.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        fn latest_tick(&self, stock_id: i64) -> Result<Option<PriceTick>, BrokerError> {
            Ok(self
                .ticks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.stock_id == stock_id)
                .max_by_key(|t| t.recorded_at)
                .cloned())
        }
    }

    struct FixedQuotes(HashMap<String, Decimal>);

    impl FixedQuotes {
        fn new(prices: &[(&str, Decimal)]) -> Self {
            FixedQuotes(prices.iter().map(|(s, p)| (s.to_string(), *p)).collect())
        }
    }

    impl QuoteSource for FixedQuotes {
        fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
            self.0.get(symbol).copied()
        }
    }

    fn job(store: &Arc<MemoryStore>, quotes: FixedQuotes, batch_size: usize) -> PriceIngestionJob {
        PriceIngestionJob::new(store.clone(), Arc::new(quotes), batch_size)
    }

    #[test]
    fn empty_universe_is_noop() {
        let store = Arc::new(MemoryStore::default());
        let report = job(&store, FixedQuotes::new(&[]), 500).run().unwrap();
        assert_eq!(report, IngestionReport::default());
        assert!(store.insert_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn every_tick_carries_cycle_time() {
        let store = Arc::new(MemoryStore::with_symbols(&["AAA", "BBB", "CCC"]));
        let quotes = FixedQuotes::new(&[
            ("AAA", dec!(10.005)),
            ("BBB", dec!(20)),
            ("CCC", dec!(30.1)),
        ]);
        let cycle = Utc::now();
        let report = job(&store, quotes, 500).run_at(cycle).unwrap();

        assert_eq!(report.persisted, 3);
        let ticks = store.ticks.lock().unwrap();
        assert!(ticks.iter().all(|t| t.recorded_at == cycle));
        assert!(ticks.iter().all(|t| t.price > Decimal::ZERO));
        assert_eq!(ticks[0].price, dec!(10.01));
    }

    #[test]
    fn failed_symbols_are_skipped() {
        let store = Arc::new(MemoryStore::with_symbols(&["AAA", "BAD", "CCC"]));
        let quotes = FixedQuotes::new(&[("AAA", dec!(1)), ("CCC", dec!(3))]);
        let report = job(&store, quotes, 500).run().unwrap();
        assert_eq!(report.symbols, 3);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.failed, vec!["BAD".to_string()]);
    }

    #[test]
    fn all_failures_still_succeed() {
        let store = Arc::new(MemoryStore::with_symbols(&["AAA", "BBB"]));
        let report = job(&store, FixedQuotes::new(&[]), 500).run().unwrap();
        assert_eq!(report.persisted, 0);
        assert_eq!(report.failed.len(), 2);
        assert!(store.insert_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn sub_cent_price_is_dropped() {
        let store = Arc::new(MemoryStore::with_symbols(&["PENNY"]));
        let quotes = FixedQuotes::new(&[("PENNY", dec!(0.004))]);
        let report = job(&store, quotes, 500).run().unwrap();
        assert_eq!(report.persisted, 0);
        assert_eq!(report.failed, vec!["PENNY".to_string()]);
    }

    #[test]
    fn flushes_in_chunks() {
        let symbols: Vec<String> = (0..7).map(|i| format!("S{i}")).collect();
        let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
        let store = Arc::new(MemoryStore::with_symbols(&refs));
        let prices: Vec<(&str, Decimal)> = refs.iter().map(|s| (*s, dec!(5))).collect();
        let report = job(&store, FixedQuotes::new(&prices), 3).run().unwrap();

        assert_eq!(report.persisted, 7);
        assert_eq!(*store.insert_calls.lock().unwrap(), vec![3, 3, 1]);
    }

    #[test]
    fn rerun_with_same_cycle_time_is_idempotent() {
        let store = Arc::new(MemoryStore::with_symbols(&["AAA", "BBB"]));
        let cycle = Utc::now();
        let first = job(
            &store,
            FixedQuotes::new(&[("AAA", dec!(1)), ("BBB", dec!(2))]),
            500,
        )
        .run_at(cycle)
        .unwrap();
        let second = job(
            &store,
            FixedQuotes::new(&[("AAA", dec!(9)), ("BBB", dec!(9))]),
            500,
        )
        .run_at(cycle)
        .unwrap();

        assert_eq!(first.persisted, 2);
        assert_eq!(second.fetched, 2);
        assert_eq!(second.persisted, 0);
        let ticks = store.ticks.lock().unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].price, dec!(1));
    }
}
