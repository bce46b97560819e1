//! SQLite storage adapter for prices, accounts, and the position ledger.
//!
//! Money is stored as integer cents, timestamps as Unix microseconds (UTC).
//! Ownership is declared in the schema: deleting a user or a stock cascades
//! to every row it owns.

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::time::Duration;

use crate::domain::account::Account;
use crate::domain::error::BrokerError;
use crate::domain::money::{from_cents, to_cents};
use crate::domain::position::Position;
use crate::domain::settings::build_database_settings;
use crate::domain::stock::{NewStock, PriceTick, Stock};
use crate::domain::trade::{LedgerSnapshot, PositionChange, Side, TradeOrder, Transaction};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_store::{LedgerStore, TradePlanner};
use crate::ports::price_store::PriceStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stocks (
    id INTEGER PRIMARY KEY,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS price_ticks (
    id INTEGER PRIMARY KEY,
    stock_id INTEGER NOT NULL REFERENCES stocks(id) ON DELETE CASCADE,
    price_cents INTEGER NOT NULL CHECK (price_cents > 0),
    recorded_at INTEGER NOT NULL,
    UNIQUE (stock_id, recorded_at)
);
CREATE INDEX IF NOT EXISTS idx_price_ticks_latest ON price_ticks(stock_id, recorded_at DESC);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    balance_cents INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS balance_history (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    balance_cents INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    stock_id INTEGER NOT NULL REFERENCES stocks(id) ON DELETE CASCADE,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    avg_cost_cents INTEGER NOT NULL CHECK (avg_cost_cents > 0),
    updated_at INTEGER NOT NULL,
    UNIQUE (user_id, stock_id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    stock_id INTEGER NOT NULL REFERENCES stocks(id) ON DELETE CASCADE,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    price_cents INTEGER NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('buy', 'sell')),
    executed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, executed_at DESC);

CREATE TRIGGER IF NOT EXISTS transactions_append_only
BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;
";

/// A balance snapshot from the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub balance: Decimal,
    pub recorded_at: DateTime<Utc>,
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_error(e: r2d2::Error) -> BrokerError {
    BrokerError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> BrokerError {
    BrokerError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn cents(value: Decimal) -> Result<i64, BrokerError> {
    to_cents(value).ok_or_else(|| BrokerError::DatabaseQuery {
        reason: format!("amount out of range: {value}"),
    })
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {raw}").into(),
        )
    })
}

fn map_stock(row: &Row<'_>) -> rusqlite::Result<Stock> {
    Ok(Stock {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
    })
}

fn map_tick(row: &Row<'_>) -> rusqlite::Result<PriceTick> {
    Ok(PriceTick {
        stock_id: row.get(0)?,
        price: from_cents(row.get(1)?),
        recorded_at: timestamp_at(row, 2)?,
    })
}

fn map_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        user_id: row.get(0)?,
        stock_id: row.get(1)?,
        quantity: row.get(2)?,
        average_cost: from_cents(row.get(3)?),
        updated_at: timestamp_at(row, 4)?,
    })
}

fn map_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let side: String = row.get(6)?;
    let side = side.parse::<Side>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        stock_id: row.get(2)?,
        symbol: row.get(3)?,
        quantity: row.get(4)?,
        price: from_cents(row.get(5)?),
        side,
        executed_at: timestamp_at(row, 7)?,
    })
}

const POSITION_COLUMNS: &str = "user_id, stock_id, quantity, avg_cost_cents, updated_at";

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BrokerError> {
        let settings = build_database_settings(config)?;
        Self::open(&settings.path, settings.pool_size)
    }

    pub fn open(path: &str, pool_size: u32) -> Result<Self, BrokerError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    /// A private in-memory database. The pool holds a single connection so
    /// every caller sees the same data.
    pub fn in_memory() -> Result<Self, BrokerError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self { pool })
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, BrokerError> {
        self.pool.get().map_err(pool_error)
    }

    pub fn initialize_schema(&self) -> Result<(), BrokerError> {
        let conn = self.connection()?;
        conn.execute_batch(SCHEMA).map_err(query_error)
    }

    pub fn create_stock(&self, stock: &NewStock) -> Result<Stock, BrokerError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO stocks (symbol, name) VALUES (?1, ?2)",
            params![stock.symbol, stock.name],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                BrokerError::Duplicate {
                    what: format!("stock {}", stock.symbol),
                }
            } else {
                query_error(e)
            }
        })?;

        Ok(Stock {
            id: conn.last_insert_rowid(),
            symbol: stock.symbol.clone(),
            name: stock.name.clone(),
        })
    }

    /// Insert many stocks in one transaction, skipping symbols that already
    /// exist. Returns how many were added.
    pub fn import_stocks(&self, stocks: &[NewStock]) -> Result<usize, BrokerError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_error)?;
        let mut added = 0;
        {
            let mut stmt = tx
                .prepare_cached("INSERT OR IGNORE INTO stocks (symbol, name) VALUES (?1, ?2)")
                .map_err(query_error)?;
            for stock in stocks {
                added += stmt
                    .execute(params![stock.symbol, stock.name])
                    .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)?;
        Ok(added)
    }

    /// Delete a stock and, through the schema, its price history and every
    /// position and transaction in it.
    pub fn delete_stock(&self, symbol: &str) -> Result<bool, BrokerError> {
        let conn = self.connection()?;
        let deleted = conn
            .execute("DELETE FROM stocks WHERE symbol = ?1", params![symbol])
            .map_err(query_error)?;
        Ok(deleted > 0)
    }

    pub fn create_user(&self, email: &str, starting_balance: Decimal) -> Result<Account, BrokerError> {
        let email = email.trim().to_lowercase();
        let balance_cents = cents(starting_balance)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_error)?;
        tx.execute(
            "INSERT INTO users (email, balance_cents) VALUES (?1, ?2)",
            params![email, balance_cents],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                BrokerError::Duplicate {
                    what: format!("user {email}"),
                }
            } else {
                query_error(e)
            }
        })?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO balance_history (user_id, balance_cents, recorded_at) VALUES (?1, ?2, ?3)",
            params![id, balance_cents, micros(Utc::now())],
        )
        .map_err(query_error)?;
        tx.commit().map_err(query_error)?;

        Ok(Account {
            id,
            email,
            balance: from_cents(balance_cents),
        })
    }

    pub fn find_user(&self, user_id: i64) -> Result<Option<Account>, BrokerError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, email, balance_cents FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    balance: from_cents(row.get(2)?),
                })
            },
        )
        .optional()
        .map_err(query_error)
    }

    /// Delete a user together with every position, transaction, and
    /// balance-history row they own.
    pub fn delete_user(&self, user_id: i64) -> Result<bool, BrokerError> {
        let conn = self.connection()?;
        let deleted = conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .map_err(query_error)?;
        Ok(deleted > 0)
    }

    /// Oldest first.
    pub fn balance_history(&self, user_id: i64) -> Result<Vec<BalanceSnapshot>, BrokerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT balance_cents, recorded_at FROM balance_history
                 WHERE user_id = ?1 ORDER BY id ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(BalanceSnapshot {
                    balance: from_cents(row.get(0)?),
                    recorded_at: timestamp_at(row, 1)?,
                })
            })
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    pub fn tick_count(&self, stock_id: i64) -> Result<usize, BrokerError> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM price_ticks WHERE stock_id = ?1",
                params![stock_id],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        Ok(count as usize)
    }
}

impl PriceStore for SqliteStore {
    fn list_stocks(&self) -> Result<Vec<Stock>, BrokerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, symbol, name FROM stocks ORDER BY symbol")
            .map_err(query_error)?;
        let rows = stmt.query_map([], map_stock).map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    fn find_stock(&self, symbol: &str) -> Result<Option<Stock>, BrokerError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, symbol, name FROM stocks WHERE symbol = ?1",
            params![symbol],
            map_stock,
        )
        .optional()
        .map_err(query_error)
    }

    fn insert_ticks(&self, ticks: &[PriceTick]) -> Result<usize, BrokerError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(query_error)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO price_ticks (stock_id, price_cents, recorded_at)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(query_error)?;
            for tick in ticks {
                inserted += stmt
                    .execute(params![
                        tick.stock_id,
                        cents(tick.price)?,
                        micros(tick.recorded_at)
                    ])
                    .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)?;
        Ok(inserted)
    }

    fn latest_tick(&self, stock_id: i64) -> Result<Option<PriceTick>, BrokerError> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT stock_id, price_cents, recorded_at FROM price_ticks
             WHERE stock_id = ?1 ORDER BY recorded_at DESC LIMIT 1",
            params![stock_id],
            map_tick,
        )
        .optional()
        .map_err(query_error)
    }
}

impl LedgerStore for SqliteStore {
    fn apply_trade(
        &self,
        order: &TradeOrder,
        planner: &TradePlanner<'_>,
    ) -> Result<Decimal, BrokerError> {
        let mut conn = self.connection()?;
        // IMMEDIATE takes the write lock before anything is read, so no
        // other trade can change this position or balance until commit.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_error)?;

        let balance_cents: i64 = tx
            .query_row(
                "SELECT balance_cents FROM users WHERE id = ?1",
                params![order.user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_error)?
            .ok_or(BrokerError::UnknownUser {
                user_id: order.user_id,
            })?;

        let position = tx
            .query_row(
                &format!(
                    "SELECT {POSITION_COLUMNS} FROM positions WHERE user_id = ?1 AND stock_id = ?2"
                ),
                params![order.user_id, order.stock_id],
                map_position,
            )
            .optional()
            .map_err(query_error)?;

        let snapshot = LedgerSnapshot {
            position,
            balance: from_cents(balance_cents),
        };
        let effect = planner(&snapshot)?;

        let executed_at = micros(order.executed_at);
        tx.execute(
            "INSERT INTO transactions (user_id, stock_id, quantity, price_cents, side, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                order.user_id,
                order.stock_id,
                order.quantity,
                cents(order.price)?,
                order.side.as_str(),
                executed_at
            ],
        )
        .map_err(query_error)?;

        match effect.position {
            PositionChange::Open {
                quantity,
                average_cost,
            } => {
                tx.execute(
                    &format!("INSERT INTO positions ({POSITION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                    params![
                        order.user_id,
                        order.stock_id,
                        quantity,
                        cents(average_cost)?,
                        executed_at
                    ],
                )
                .map_err(query_error)?;
            }
            PositionChange::Update {
                quantity,
                average_cost,
            } => {
                tx.execute(
                    "UPDATE positions SET quantity = ?1, avg_cost_cents = ?2, updated_at = ?3
                     WHERE user_id = ?4 AND stock_id = ?5",
                    params![
                        quantity,
                        cents(average_cost)?,
                        executed_at,
                        order.user_id,
                        order.stock_id
                    ],
                )
                .map_err(query_error)?;
            }
            PositionChange::Close => {
                tx.execute(
                    "DELETE FROM positions WHERE user_id = ?1 AND stock_id = ?2",
                    params![order.user_id, order.stock_id],
                )
                .map_err(query_error)?;
            }
        }

        tx.execute(
            "UPDATE users SET balance_cents = balance_cents + ?1 WHERE id = ?2",
            params![cents(effect.balance_delta)?, order.user_id],
        )
        .map_err(query_error)?;

        let new_balance: i64 = tx
            .query_row(
                "SELECT balance_cents FROM users WHERE id = ?1",
                params![order.user_id],
                |row| row.get(0),
            )
            .map_err(query_error)?;

        tx.execute(
            "INSERT INTO balance_history (user_id, balance_cents, recorded_at) VALUES (?1, ?2, ?3)",
            params![order.user_id, new_balance, executed_at],
        )
        .map_err(query_error)?;

        tx.commit().map_err(query_error)?;
        Ok(from_cents(new_balance))
    }

    fn balance(&self, user_id: i64) -> Result<Decimal, BrokerError> {
        self.find_user(user_id)?
            .map(|account| account.balance)
            .ok_or(BrokerError::UnknownUser { user_id })
    }

    fn position(&self, user_id: i64, stock_id: i64) -> Result<Option<Position>, BrokerError> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {POSITION_COLUMNS} FROM positions WHERE user_id = ?1 AND stock_id = ?2"),
            params![user_id, stock_id],
            map_position,
        )
        .optional()
        .map_err(query_error)
    }

    fn positions(&self, user_id: i64) -> Result<Vec<Position>, BrokerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {POSITION_COLUMNS} FROM positions WHERE user_id = ?1 ORDER BY stock_id"
            ))
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![user_id], map_position)
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    fn transactions(&self, user_id: i64) -> Result<Vec<Transaction>, BrokerError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.user_id, t.stock_id, s.symbol, t.quantity, t.price_cents,
                        t.side, t.executed_at
                 FROM transactions t JOIN stocks s ON s.id = t.stock_id
                 WHERE t.user_id = ?1
                 ORDER BY t.executed_at DESC, t.id DESC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![user_id], map_transaction)
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }
}
