//! CSV import of stock reference data.
//!
//! Expected header: `symbol,name`. Blank symbols are errors; the name column
//! may be empty, in which case the symbol is used.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::domain::error::BrokerError;
use crate::domain::stock::NewStock;

pub fn read_stocks<P: AsRef<Path>>(path: P) -> Result<Vec<NewStock>, BrokerError> {
    let content = fs::read_to_string(path)?;
    parse_stocks(&content)
}

pub fn parse_stocks(content: &str) -> Result<Vec<NewStock>, BrokerError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut stocks = Vec::new();
    let mut seen = HashSet::new();

    for (line, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| BrokerError::Database {
            reason: format!("CSV parse error: {}", e),
        })?;

        let raw_symbol = record.get(0).unwrap_or_default();
        let name = record.get(1).unwrap_or_default();
        let stock = NewStock::new(raw_symbol, name).ok_or_else(|| BrokerError::Database {
            // +2: one for the header, one for 1-based numbering
            reason: format!("missing symbol on line {}", line + 2),
        })?;

        if seen.insert(stock.symbol.clone()) {
            stocks.push(stock);
        }
    }

    Ok(stocks)
}
