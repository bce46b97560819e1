//! Port traits implemented by the adapters.

pub mod config_port;
pub mod ledger_store;
pub mod price_store;
pub mod quote_port;
