//! Core domain types and logic.

pub mod account;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod money;
pub mod portfolio;
pub mod position;
pub mod rate_limiter;
pub mod scheduler;
pub mod settings;
pub mod stock;
pub mod trade;
