use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::records::{self, VendorRecord};

/// Call or put.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Both sides, in the order chains are requested.
    pub const ALL: [OptionType; 2] = [OptionType::Call, OptionType::Put];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One listed option, as returned by a chain request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionContract {
    pub code: String,
    pub option_type: OptionType,
    /// Expiration date as the vendor wrote it (date part only).
    pub expiry: String,
}

/// Contracts grouped by expiration date string.
pub type Expirations = BTreeMap<String, Vec<OptionContract>>;

/// Market snapshot fields the IV pipeline reads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotRecord {
    pub code: String,
    pub delta: Option<f64>,
    pub implied_volatility: Option<f64>,
    pub open_interest: Option<f64>,
    pub last_price: Option<f64>,
}

impl SnapshotRecord {
    /// Extracts the known fields from a raw vendor row. Returns `None` without a code.
    pub fn from_vendor(record: &VendorRecord) -> Option<Self> {
        let code = records::string_field(record, records::SNAPSHOT_CODE_KEYS)?;
        Some(Self {
            code,
            delta: records::number_field(record, records::DELTA_KEYS),
            implied_volatility: records::number_field(record, records::IV_KEYS),
            open_interest: records::number_field(record, records::OPEN_INTEREST_KEYS),
            last_price: records::number_field(record, records::LAST_PRICE_KEYS),
        })
    }
}

/// ATM implied volatility (percent) at one days-to-expiration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DtePoint {
    pub dte: u32,
    pub atm_iv: f64,
}

impl DtePoint {
    pub fn new(dte: u32, atm_iv: f64) -> Self {
        Self { dte, atm_iv }
    }
}

/// IV term structure for one symbol.
///
/// Every field is `None` unless it could be derived from at least one ATM point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IvTermResult {
    pub iv7: Option<f64>,
    pub iv30: Option<f64>,
    pub iv60: Option<f64>,
    pub iv90: Option<f64>,
    pub total_oi: Option<i64>,
}

impl IvTermResult {
    /// True if any IV horizon has a value.
    pub fn is_valid(&self) -> bool {
        self.iv7.is_some() || self.iv30.is_some() || self.iv60.is_some() || self.iv90.is_some()
    }
}

/// Formats an IV for log lines, e.g. `23.69%` or `N/A`.
pub(crate) fn fmt_iv(value: Option<f64>) -> String {
    match value {
        Some(iv) => format!("{:.2}%", iv),
        None => "N/A".to_string(),
    }
}
