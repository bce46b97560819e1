#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use virtualbroker::adapters::sqlite_adapter::SqliteStore;
use virtualbroker::domain::account::Account;
use virtualbroker::domain::stock::{NewStock, PriceTick, Stock};
use virtualbroker::ports::price_store::PriceStore;
use virtualbroker::ports::quote_port::QuoteSource;

/// Quote source answering from a fixed table. Symbols not in the table fail.
pub struct MockQuoteSource {
    pub prices: HashMap<String, Decimal>,
    pub calls: Mutex<Vec<String>>,
}

impl MockQuoteSource {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl QuoteSource for MockQuoteSource {
    fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        self.calls.lock().unwrap().push(symbol.to_string());
        self.prices.get(symbol).copied()
    }
}

pub fn memory_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize_schema().unwrap();
    store
}

/// A file-backed store with a real connection pool, for tests that need
/// several connections at once.
pub fn file_store(dir: &tempfile::TempDir, pool_size: u32) -> SqliteStore {
    let path = dir.path().join("broker.db");
    let store = SqliteStore::open(path.to_str().unwrap(), pool_size).unwrap();
    store.initialize_schema().unwrap();
    store
}

pub fn add_stock(store: &SqliteStore, symbol: &str) -> Stock {
    store
        .create_stock(&NewStock::new(symbol, &format!("{symbol} Corp")).unwrap())
        .unwrap()
}

pub fn add_user(store: &SqliteStore, email: &str, balance: Decimal) -> Account {
    store.create_user(email, balance).unwrap()
}

/// Record `price` for `stock`, `minutes_ago` minutes before now.
pub fn set_price(store: &SqliteStore, stock: &Stock, price: Decimal, minutes_ago: i64) {
    let at: DateTime<Utc> = Utc::now() - Duration::minutes(minutes_ago);
    let inserted = store
        .insert_ticks(&[PriceTick {
            stock_id: stock.id,
            price,
            recorded_at: at,
        }])
        .unwrap();
    assert_eq!(inserted, 1);
}

pub fn write_temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
