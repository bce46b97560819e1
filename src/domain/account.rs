//! User accounts and the cash-balance policy.

use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub balance: Decimal,
}

/// What a buy does when its notional exceeds the cash balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FundsPolicy {
    /// Reject the buy with `InsufficientFunds`; balances never go negative.
    #[default]
    Reject,
    /// Debit regardless, letting the balance go negative.
    AllowNegative,
}

impl FundsPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundsPolicy::Reject => "reject",
            FundsPolicy::AllowNegative => "allow_negative",
        }
    }
}

impl fmt::Display for FundsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FundsPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(FundsPolicy::Reject),
            "allow_negative" | "margin" => Ok(FundsPolicy::AllowNegative),
            other => Err(format!(
                "unknown funds policy '{other}' (expected reject or allow_negative)"
            )),
        }
    }
}
