//! Per-symbol pipeline measurements.

use std::time::Duration;

use log::info;
use serde::Serialize;

/// Outcome of one per-symbol fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Empty,
}

/// Why a fetch produced no IV.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    NoExpirations,
    NoIvPoints,
}

/// Counts and timing of one IV term fetch, returned by the pipeline and logged by
/// the connector.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FetchMetrics {
    pub symbol: String,
    pub status: FetchStatus,
    pub reason: Option<EmptyReason>,
    pub expirations: usize,
    pub contracts: usize,
    pub snapshots: usize,
    pub points: usize,
    pub total_oi: Option<i64>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

impl FetchMetrics {
    pub(crate) fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: FetchStatus::Ok,
            reason: None,
            expirations: 0,
            contracts: 0,
            snapshots: 0,
            points: 0,
            total_oi: None,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn empty(mut self, reason: EmptyReason) -> Self {
        self.status = FetchStatus::Empty;
        self.reason = Some(reason);
        self
    }

    pub fn log(&self, vendor: &str, op: &str) {
        info!(
            "{}.{} symbol={} status={:?} reason={:?} expirations={} contracts={} snapshots={} points={} total_oi={:?} elapsed_ms={}",
            vendor,
            op,
            self.symbol,
            self.status,
            self.reason,
            self.expirations,
            self.contracts,
            self.snapshots,
            self.points,
            self.total_oi,
            self.elapsed.as_millis()
        );
    }
}
