use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;

/// Unit of a history duration (`"80 D"`, `"1 Y"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "S")]
    Seconds,
    #[serde(rename = "D")]
    Days,
    #[serde(rename = "W")]
    Weeks,
    #[serde(rename = "M")]
    Months,
    #[serde(rename = "Y")]
    Years,
}

impl DurationUnit {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Seconds => "S",
            Self::Days => "D",
            Self::Weeks => "W",
            Self::Months => "M",
            Self::Years => "Y",
        }
    }
}

/// How far back a historical request reaches, in the vendor's `"<n> <unit>"` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryDuration {
    pub amount: u32,
    pub unit: DurationUnit,
}

impl HistoryDuration {
    pub const fn new(amount: u32, unit: DurationUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn days(amount: u32) -> Self {
        Self::new(amount, DurationUnit::Days)
    }

    pub const fn years(amount: u32) -> Self {
        Self::new(amount, DurationUnit::Years)
    }

    /// Enough daily bars for a 63-day change.
    pub const RELATIVE_MOMENTUM: Self = Self::days(80);

    pub const ONE_YEAR: Self = Self::years(1);
}

impl Default for HistoryDuration {
    fn default() -> Self {
        Self::ONE_YEAR
    }
}

impl fmt::Display for HistoryDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.code())
    }
}

impl FromStr for HistoryDuration {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BrokerError::InvalidDuration(s.to_string());
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let amount: u32 = amount.parse().map_err(|_| invalid())?;
        if amount == 0 {
            return Err(invalid());
        }
        let unit = match unit.to_ascii_uppercase().as_str() {
            "S" => DurationUnit::Seconds,
            "D" => DurationUnit::Days,
            "W" => DurationUnit::Weeks,
            "M" => DurationUnit::Months,
            "Y" => DurationUnit::Years,
            _ => return Err(invalid()),
        };
        Ok(Self::new(amount, unit))
    }
}

/// One daily OHLCV bar.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A daily close.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl From<&Bar> for ClosePoint {
    fn from(bar: &Bar) -> Self {
        Self {
            date: bar.date,
            close: bar.close,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityKind {
    Stock,
    Index,
}

/// Instrument description sent to the history vendor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub kind: SecurityKind,
    pub exchange: String,
    pub currency: String,
    /// Vendor contract id, filled in by qualification.
    pub con_id: Option<i64>,
}

impl Contract {
    /// US stock or ETF routed through SMART.
    pub fn stock(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            kind: SecurityKind::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            con_id: None,
        }
    }

    pub fn index(symbol: &str, exchange: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            kind: SecurityKind::Index,
            exchange: exchange.to_string(),
            currency: "USD".to_string(),
            con_id: None,
        }
    }

    pub fn vix() -> Self {
        Self::index("VIX", "CBOE")
    }
}

/// Snapshot quote for one contract.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub last: Option<f64>,
    pub close: Option<f64>,
}

impl PriceSnapshot {
    /// Last trade when it is a positive price, otherwise the close.
    pub fn price(&self) -> Option<f64> {
        let valid = |value: Option<f64>| value.filter(|price| price.is_finite() && *price > 0.0);
        valid(self.last).or_else(|| valid(self.close))
    }
}

/// Market data feed requested after connecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDataType {
    Live = 1,
    Frozen = 2,
    Delayed = 3,
    DelayedFrozen = 4,
}

/// Daily-bar request parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct BarRequest {
    pub duration: HistoryDuration,
    pub what_to_show: &'static str,
    pub use_rth: bool,
    pub timeout: Duration,
}

impl BarRequest {
    /// Historical trades request; large ranges need the long timeout.
    pub fn trades(duration: HistoryDuration) -> Self {
        Self {
            duration,
            what_to_show: "TRADES",
            use_rth: true,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
