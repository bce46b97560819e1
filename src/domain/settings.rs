//! Typed settings built from the INI configuration, validated up front.

use rust_decimal::Decimal;
use std::time::Duration;

use crate::domain::account::FundsPolicy;
use crate::domain::error::BrokerError;
use crate::domain::money::quantize;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_INTERVAL_MINUTES: i64 = 25;
/// One week.
pub const MAX_INTERVAL_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_SPACING_SECONDS: f64 = 1.25;
pub const MAX_SPACING_SECONDS: f64 = 3600.0;
pub const DEFAULT_BATCH_SIZE: i64 = 500;
pub const MAX_BATCH_SIZE: i64 = 500;
pub const DEFAULT_MISFIRE_GRACE_SECONDS: i64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 10;
pub const MAX_TIMEOUT_SECONDS: i64 = 3600;
pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";
pub const DEFAULT_TOKEN_ENV: &str = "FINNHUB_API_KEY";
pub const DEFAULT_STARTING_BALANCE: &str = "10000.00";

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSettings {
    pub interval: Duration,
    pub spacing: Duration,
    pub batch_size: usize,
    pub misfire_grace: Duration,
    pub base_url: String,
    pub timeout: Duration,
    pub token_env: String,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        IngestionSettings {
            interval: Duration::from_secs(DEFAULT_INTERVAL_MINUTES as u64 * 60),
            spacing: Duration::from_secs_f64(DEFAULT_SPACING_SECONDS),
            batch_size: DEFAULT_BATCH_SIZE as usize,
            misfire_grace: Duration::from_secs(DEFAULT_MISFIRE_GRACE_SECONDS as u64),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS as u64),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    pub funds_policy: FundsPolicy,
    pub starting_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub path: String,
    pub pool_size: u32,
}

fn invalid(section: &str, key: &str, reason: &str) -> BrokerError {
    BrokerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

pub fn build_ingestion_settings(config: &dyn ConfigPort) -> Result<IngestionSettings, BrokerError> {
    let interval_minutes = config.get_int("ingestion", "interval_minutes", DEFAULT_INTERVAL_MINUTES);
    if !(1..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
        return Err(invalid(
            "ingestion",
            "interval_minutes",
            &format!("interval_minutes must be between 1 and {MAX_INTERVAL_MINUTES}"),
        ));
    }

    let spacing_seconds = config.get_double("ingestion", "spacing_seconds", DEFAULT_SPACING_SECONDS);
    if !(spacing_seconds > 0.0 && spacing_seconds <= MAX_SPACING_SECONDS) {
        return Err(invalid(
            "ingestion",
            "spacing_seconds",
            &format!("spacing_seconds must be positive and at most {MAX_SPACING_SECONDS}"),
        ));
    }

    let batch_size = config.get_int("ingestion", "batch_size", DEFAULT_BATCH_SIZE);
    if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(invalid(
            "ingestion",
            "batch_size",
            &format!("batch_size must be between 1 and {MAX_BATCH_SIZE}"),
        ));
    }

    let grace = config.get_int(
        "ingestion",
        "misfire_grace_seconds",
        DEFAULT_MISFIRE_GRACE_SECONDS,
    );
    if grace < 0 {
        return Err(invalid(
            "ingestion",
            "misfire_grace_seconds",
            "misfire_grace_seconds must be non-negative",
        ));
    }

    let timeout = config.get_int("ingestion", "timeout_seconds", DEFAULT_TIMEOUT_SECONDS);
    if !(1..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
        return Err(invalid(
            "ingestion",
            "timeout_seconds",
            &format!("timeout_seconds must be between 1 and {MAX_TIMEOUT_SECONDS}"),
        ));
    }

    let base_url = config
        .get_string("ingestion", "base_url")
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(invalid(
            "ingestion",
            "base_url",
            "base_url must be an http(s) URL",
        ));
    }

    let token_env = config
        .get_string("ingestion", "token_env")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());

    Ok(IngestionSettings {
        interval: Duration::from_secs(interval_minutes as u64 * 60),
        spacing: Duration::from_secs_f64(spacing_seconds),
        batch_size: batch_size as usize,
        misfire_grace: Duration::from_secs(grace as u64),
        base_url,
        timeout: Duration::from_secs(timeout as u64),
        token_env: token_env.trim().to_string(),
    })
}

pub fn build_ledger_settings(config: &dyn ConfigPort) -> Result<LedgerSettings, BrokerError> {
    let funds_policy = match config.get_string("ledger", "funds_policy") {
        None => FundsPolicy::default(),
        Some(s) => s
            .parse::<FundsPolicy>()
            .map_err(|reason| invalid("ledger", "funds_policy", &reason))?,
    };

    let raw_balance = config
        .get_string("ledger", "starting_balance")
        .unwrap_or_else(|| DEFAULT_STARTING_BALANCE.to_string());
    let starting_balance = parse_amount(&raw_balance)
        .ok_or_else(|| invalid("ledger", "starting_balance", "not a decimal amount"))?;
    if starting_balance < Decimal::ZERO {
        return Err(invalid(
            "ledger",
            "starting_balance",
            "starting_balance must be non-negative",
        ));
    }

    Ok(LedgerSettings {
        funds_policy,
        starting_balance,
    })
}

pub fn build_database_settings(config: &dyn ConfigPort) -> Result<DatabaseSettings, BrokerError> {
    let path = config
        .get_string("database", "path")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| BrokerError::ConfigMissing {
            section: "database".into(),
            key: "path".into(),
        })?;

    let pool_size = config.get_int("database", "pool_size", 4);
    if !(1..=64).contains(&pool_size) {
        return Err(invalid(
            "database",
            "pool_size",
            "pool_size must be between 1 and 64",
        ));
    }

    Ok(DatabaseSettings {
        path: path.trim().to_string(),
        pool_size: pool_size as u32,
    })
}

/// Parse a currency amount exactly and quantize it to cents.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    raw.trim().parse::<Decimal>().ok().map(quantize)
}
