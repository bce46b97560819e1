//! virtualbroker: simulated stock trading ledger with periodic price ingestion.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], composition in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
