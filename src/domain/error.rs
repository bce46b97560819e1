//! Domain error types.

use rust_decimal::Decimal;

/// Top-level error type for virtualbroker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("quote provider credential missing: set the {var} environment variable")]
    CredentialMissing { var: String },

    #[error("quantity must be a positive integer, got {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("unknown user: {user_id}")]
    UnknownUser { user_id: i64 },

    #[error("no price available for {symbol}")]
    NoPrice { symbol: String },

    #[error("insufficient holdings to sell {requested} {symbol} (holding {held})")]
    InsufficientHoldings {
        symbol: String,
        held: i64,
        requested: i64,
    },

    #[error("insufficient funds: trade requires {required}, balance is {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("buying would push the {symbol} position past the maximum share count")]
    QuantityOverflow { symbol: String },

    #[error("{what} already exists")]
    Duplicate { what: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// True for rejections caused by the trade request itself rather than
    /// by storage or configuration.
    pub fn is_trade_rejection(&self) -> bool {
        matches!(
            self,
            BrokerError::InvalidQuantity { .. }
                | BrokerError::UnknownSymbol { .. }
                | BrokerError::UnknownUser { .. }
                | BrokerError::NoPrice { .. }
                | BrokerError::InsufficientHoldings { .. }
                | BrokerError::InsufficientFunds { .. }
                | BrokerError::QuantityOverflow { .. }
        )
    }
}

impl From<&BrokerError> for std::process::ExitCode {
    fn from(err: &BrokerError) -> Self {
        let code: u8 = match err {
            BrokerError::Io(_) => 1,
            BrokerError::ConfigParse { .. }
            | BrokerError::ConfigMissing { .. }
            | BrokerError::ConfigInvalid { .. }
            | BrokerError::CredentialMissing { .. } => 2,
            BrokerError::Database { .. } | BrokerError::DatabaseQuery { .. } => 3,
            BrokerError::InvalidQuantity { .. }
            | BrokerError::NoPrice { .. }
            | BrokerError::InsufficientHoldings { .. }
            | BrokerError::InsufficientFunds { .. }
            | BrokerError::QuantityOverflow { .. } => 4,
            BrokerError::UnknownSymbol { .. }
            | BrokerError::UnknownUser { .. }
            | BrokerError::Duplicate { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
