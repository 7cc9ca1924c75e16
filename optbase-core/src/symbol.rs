//! Option contract code parser.
//!
//! Grammar: `UNDERLYING(2-6 alpha) YYMMDD C|P STRIKE(digits, thousandths)`,
//! e.g. `AAPL240119C00150000` → AAPL, 2024-01-19, Call, 150.000.
//!
//! The code is split from the right (strike digits, type character, date
//! block, underlying) so each rejection names the component that failed.

use crate::domain::{OptionIdentity, OptionType};
use chrono::NaiveDate;
use std::path::Path;
use thiserror::Error;

/// Strike blocks longer than this do not fit the OCC layout.
const MAX_STRIKE_DIGITS: usize = 8;

/// Parse-time failures. Non-retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("malformed contract code '{code}': {reason}")]
    MalformedSymbol { code: String, reason: String },

    #[error("invalid underlying '{underlying}' in '{code}' (expected 2-6 upper-case letters)")]
    InvalidUnderlying { code: String, underlying: String },

    #[error("invalid expiry '{block}' in '{code}' (expected a YYMMDD calendar date)")]
    InvalidExpiry { code: String, block: String },

    #[error("invalid option type '{found}' in '{code}' (expected C or P)")]
    InvalidOptionType { code: String, found: char },

    #[error("invalid strike in '{code}': {strike_milli} thousandths is not positive")]
    InvalidStrike { code: String, strike_milli: u64 },
}

impl SymbolError {
    /// Short name of the error kind, for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SymbolError::MalformedSymbol { .. } => "MalformedSymbol",
            SymbolError::InvalidUnderlying { .. } => "InvalidUnderlying",
            SymbolError::InvalidExpiry { .. } => "InvalidExpiry",
            SymbolError::InvalidOptionType { .. } => "InvalidOptionType",
            SymbolError::InvalidStrike { .. } => "InvalidStrike",
        }
    }
}

/// Parse a contract code into an [`OptionIdentity`].
///
/// A leading `O:` (vendor prefix) is ignored.
pub fn parse(code: &str) -> Result<OptionIdentity, SymbolError> {
    let body = code.strip_prefix("O:").unwrap_or(code);
    let malformed = |reason: &str| SymbolError::MalformedSymbol {
        code: code.to_string(),
        reason: reason.to_string(),
    };

    if body.is_empty() {
        return Err(malformed("empty code"));
    }
    if !body.is_ascii() {
        return Err(malformed("non-ASCII characters"));
    }

    // Everything is ASCII from here on, so byte offsets are char offsets.
    let type_pos = body
        .rfind(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| malformed("no option type character"))?;
    let strike_block = &body[type_pos + 1..];
    if strike_block.is_empty() {
        return Err(malformed("missing strike"));
    }
    if strike_block.len() > MAX_STRIKE_DIGITS {
        return Err(malformed("strike has more than 8 digits"));
    }
    let type_char = body.as_bytes()[type_pos] as char;

    let head = &body[..type_pos];
    let date_start = head
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let underlying = &head[..date_start];
    let date_block = &head[date_start..];

    if !(2..=6).contains(&underlying.len())
        || !underlying.chars().all(|c| c.is_ascii_uppercase())
    {
        return Err(SymbolError::InvalidUnderlying {
            code: code.to_string(),
            underlying: underlying.to_string(),
        });
    }

    let expiry = parse_yymmdd(date_block).ok_or_else(|| SymbolError::InvalidExpiry {
        code: code.to_string(),
        block: date_block.to_string(),
    })?;

    let option_type =
        OptionType::from_code(type_char).ok_or_else(|| SymbolError::InvalidOptionType {
            code: code.to_string(),
            found: type_char,
        })?;

    let strike_milli: u64 = strike_block
        .parse()
        .map_err(|_| malformed("strike is not numeric"))?;
    if strike_milli == 0 {
        return Err(SymbolError::InvalidStrike {
            code: code.to_string(),
            strike_milli,
        });
    }

    Ok(OptionIdentity {
        underlying: underlying.to_string(),
        expiry,
        option_type,
        strike_milli,
    })
}

/// Derive the contract from a flat-file name such as `AAPL240119C00150000.csv`.
pub fn parse_filename(path: &Path) -> Result<OptionIdentity, SymbolError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SymbolError::MalformedSymbol {
            code: path.display().to_string(),
            reason: "file name is not valid UTF-8".into(),
        })?;
    parse(stem)
}

/// Render an identity as its canonical contract code.
pub fn format(identity: &OptionIdentity) -> String {
    identity.code()
}

fn parse_yymmdd(block: &str) -> Option<NaiveDate> {
    if block.len() != 6 || !block.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = block[0..2].parse().ok()?;
    let mm: u32 = block[2..4].parse().ok()?;
    let dd: u32 = block[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
}
