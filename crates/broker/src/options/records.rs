//! Field extraction from loosely-typed vendor rows.
//!
//! Vendor client versions disagree on column names and value types, so every
//! field is looked up through a list of aliases. The first alias present with a
//! non-null value wins.

use chrono::NaiveDate;
use serde_json::{Map, Value};

/// One row of a vendor table (chain or snapshot), column name to value.
pub type VendorRecord = Map<String, Value>;

pub const EXPIRY_KEYS: &[&str] = &[
    "expiry_date",
    "expire_date",
    "expiration_date",
    "expiry",
    "strike_time",
    "strike_date",
];
pub const CONTRACT_CODE_KEYS: &[&str] = &["code", "option_code", "contract_code", "security_code"];
pub const SNAPSHOT_CODE_KEYS: &[&str] = &["code", "option_code"];
pub const DELTA_KEYS: &[&str] = &["option_delta", "delta"];
pub const IV_KEYS: &[&str] = &["option_implied_volatility", "implied_volatility", "iv"];
pub const OPEN_INTEREST_KEYS: &[&str] = &["option_open_interest", "open_interest", "oi"];
pub const LAST_PRICE_KEYS: &[&str] = &["last_price"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        _ => false,
    }
}

/// First non-empty alias rendered as a string.
pub fn string_field(record: &VendorRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !is_empty(value))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// First non-null alias as a number.
///
/// Strings are parsed; a value that fails to parse yields `None` rather than
/// falling through to the next alias.
pub fn number_field(record: &VendorRecord, keys: &[&str]) -> Option<f64> {
    let value = keys
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Expiration date of a chain row, truncated at the first space (drops a time part).
pub fn expiry_field(record: &VendorRecord) -> Option<String> {
    let raw = string_field(record, EXPIRY_KEYS)?;
    let date = raw.split(' ').next().unwrap_or_default().to_string();
    (!date.is_empty()).then_some(date)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}
