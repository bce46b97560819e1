//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod finnhub_adapter;
pub mod sqlite_adapter;
