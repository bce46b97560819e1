//! Finnhub `/quote` client.
//!
//! Every request waits on the shared [`RateLimiter`] first. Any problem with a
//! single symbol (transport error, timeout, non-2xx status, unparseable body,
//! missing or non-positive price) is logged and reported as `None`.

use log::{debug, warn};
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::error::BrokerError;
use crate::domain::rate_limiter::RateLimiter;
use crate::domain::settings::IngestionSettings;
use crate::ports::quote_port::QuoteSource;

/// Response from /quote. Only the current price is used.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<serde_json::Number>,
}

#[derive(Debug, Clone, PartialEq)]
enum QuoteFailure {
    Timeout,
    Transport(String),
    Status(u16),
    Malformed(String),
    MissingPrice,
    NonPositive(f64),
}

impl fmt::Display for QuoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteFailure::Timeout => write!(f, "request timed out"),
            QuoteFailure::Transport(e) => write!(f, "request failed: {e}"),
            QuoteFailure::Status(code) => write!(f, "HTTP {code}"),
            QuoteFailure::Malformed(e) => write!(f, "unparseable quote response: {e}"),
            QuoteFailure::MissingPrice => write!(f, "no current price in response"),
            QuoteFailure::NonPositive(p) => write!(f, "non-positive price {p}"),
        }
    }
}

fn parse_quote(body: &str) -> Result<Decimal, QuoteFailure> {
    let response: QuoteResponse =
        serde_json::from_str(body).map_err(|e| QuoteFailure::Malformed(e.to_string()))?;
    let number = response.c.ok_or(QuoteFailure::MissingPrice)?;
    let as_float = number.as_f64().unwrap_or(0.0);
    if !as_float.is_finite() || as_float <= 0.0 {
        return Err(QuoteFailure::NonPositive(as_float));
    }
    // Parse the JSON literal itself so no binary rounding creeps in.
    let literal = number.to_string();
    Decimal::from_str(&literal)
        .or_else(|_| Decimal::from_scientific(&literal))
        .map_err(|e| QuoteFailure::Malformed(e.to_string()))
}

pub struct QuoteClient {
    client: Client,
    base_url: String,
    token: String,
    limiter: Arc<RateLimiter>,
}

impl QuoteClient {
    pub fn new(
        settings: &IngestionSettings,
        token: String,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, BrokerError> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(BrokerError::CredentialMissing {
                var: settings.token_env.clone(),
            });
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BrokerError::ConfigInvalid {
                section: "ingestion".into(),
                key: "base_url".into(),
                reason: format!("cannot build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            token,
            limiter,
        })
    }

    /// Build from the token in the environment variable named by the
    /// settings. A `.env` file in the working directory is honoured.
    pub fn from_env(
        settings: &IngestionSettings,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, BrokerError> {
        let _ = dotenvy::dotenv();
        let token = std::env::var(&settings.token_env).map_err(|_| {
            BrokerError::CredentialMissing {
                var: settings.token_env.clone(),
            }
        })?;
        Self::new(settings, token, limiter)
    }

    fn request(&self, symbol: &str) -> Result<Decimal, QuoteFailure> {
        let url = format!("{}/quote", self.base_url);
        debug!("Finnhub request: /quote for {}", symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", self.token.as_str())])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteFailure::Timeout
                } else {
                    QuoteFailure::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteFailure::Status(status.as_u16()));
        }

        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                QuoteFailure::Timeout
            } else {
                QuoteFailure::Transport(e.without_url().to_string())
            }
        })?;
        parse_quote(&body)
    }
}

impl QuoteSource for QuoteClient {
    fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        self.limiter.wait();
        match self.request(symbol) {
            Ok(price) => Some(price),
            Err(failure) => {
                warn!("[Finnhub] {} failed: {}", symbol, failure);
                None
            }
        }
    }
}
