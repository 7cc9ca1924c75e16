//! Option contract identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// One-character code used in contract symbols and the store's `type` column.
    pub fn code(self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'C' => Some(OptionType::Call),
            'P' => Some(OptionType::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "Call"),
            OptionType::Put => write!(f, "Put"),
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = String;

    /// Accepts `C`, `P`, `call`, `put` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "call" => Ok(OptionType::Call),
            "p" | "put" => Ok(OptionType::Put),
            other => Err(format!("unknown option type '{other}' (expected call or put)")),
        }
    }
}

/// Structured attributes of one option contract.
///
/// Built by [`crate::symbol::parse`]; immutable afterwards. The strike is held
/// as integer thousandths so that the contract code round-trips exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionIdentity {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike_milli: u64,
}

impl OptionIdentity {
    /// Strike as a decimal price (`strike_milli / 1000`).
    pub fn strike(&self) -> f64 {
        self.strike_milli as f64 / 1000.0
    }

    /// Canonical contract code, e.g. `AAPL240119C00150000`.
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OptionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{:08}",
            self.underlying,
            self.expiry.format("%y%m%d"),
            self.option_type.code(),
            self.strike_milli
        )
    }
}
