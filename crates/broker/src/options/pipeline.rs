//! Per-symbol IV term pipeline.
//!
//! Expirations -> snapshots -> ATM IV per expiry -> interpolated horizons. Runs as
//! one job on the options worker thread; every vendor call goes through the
//! shared limiters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::errors::BrokerError;
use crate::metrics::{EmptyReason, FetchMetrics};
use crate::rate_limiter::{RateLimit, SlidingWindowLimiter};
use crate::worker::WorkerContext;

use super::atm::pick_atm_iv;
use super::client::OptionQuoteApi;
use super::expirations::collect_expirations;
use super::interpolation::term_structure;
use super::models::{DtePoint, Expirations, IvTermResult, SnapshotRecord};
use super::records::parse_date;
use super::snapshots::{contract_codes, fetch_snapshot_map};

/// Limiters shared by every pipeline run of one options connector.
#[derive(Debug)]
pub struct OptionLimiters {
    pub chain: SlidingWindowLimiter,
    pub snapshot: SlidingWindowLimiter,
}

impl OptionLimiters {
    pub fn new(chain: RateLimit, snapshot: RateLimit) -> Self {
        Self {
            chain: SlidingWindowLimiter::new("option_chain", chain),
            snapshot: SlidingWindowLimiter::new("market_snapshot", snapshot),
        }
    }
}

impl Default for OptionLimiters {
    fn default() -> Self {
        Self::new(RateLimit::option_chain(), RateLimit::market_snapshot())
    }
}

/// Vendor code for a symbol: `"{market}.{SYMBOL}"` unless it already has a prefix.
pub fn format_code(market: &str, symbol: &str) -> String {
    if symbol.contains('.') {
        symbol.to_string()
    } else {
        format!("{}.{}", market, symbol.to_uppercase())
    }
}

/// One ATM point per future expiry, sorted by days to expiration.
pub fn build_dte_points(
    today: NaiveDate,
    expirations: &Expirations,
    snapshots: &HashMap<String, SnapshotRecord>,
) -> Vec<DtePoint> {
    let mut points: Vec<DtePoint> = expirations
        .iter()
        .filter_map(|(expiry, contracts)| {
            let dte = (parse_date(expiry)? - today).num_days();
            if dte <= 0 {
                return None;
            }
            let dte = u32::try_from(dte).ok()?;
            pick_atm_iv(contracts, snapshots).map(|iv| DtePoint::new(dte, iv))
        })
        .collect();
    points.sort_by_key(|point| point.dte);
    points
}

/// Open interest as a whole contract count. Negative or out-of-range values are dropped.
fn contract_count(oi: f64) -> Option<i64> {
    let rounded = oi.round();
    (rounded.is_finite() && rounded >= 0.0 && rounded < i64::MAX as f64).then_some(rounded as i64)
}

/// Sum of open interest over all snapshots; `None` when no snapshot carries it.
pub fn sum_open_interest(snapshots: &HashMap<String, SnapshotRecord>) -> Option<i64> {
    snapshots
        .values()
        .filter_map(|snapshot| snapshot.open_interest)
        .filter_map(contract_count)
        .fold(None, |total, oi| Some(total.unwrap_or(0).saturating_add(oi)))
}

/// Runs the whole pipeline for one symbol on the worker thread.
pub fn fetch_symbol_iv_terms<C: OptionQuoteApi + 'static>(
    ctx: &WorkerContext<C>,
    limiters: &OptionLimiters,
    symbol: &str,
    code: &str,
    today: NaiveDate,
    max_days: u32,
) -> Result<(IvTermResult, FetchMetrics), BrokerError> {
    let started = Instant::now();
    let mut metrics = FetchMetrics::new(symbol);
    let end = today + chrono::Duration::days(i64::from(max_days));

    let expirations = collect_expirations(ctx, &limiters.chain, code, today, end)?;
    if expirations.is_empty() {
        metrics.elapsed = started.elapsed();
        return Ok((IvTermResult::default(), metrics.empty(EmptyReason::NoExpirations)));
    }
    metrics.expirations = expirations.len();

    let codes = contract_codes(&expirations);
    metrics.contracts = codes.len();

    let snapshots = fetch_snapshot_map(ctx, &limiters.snapshot, &codes)?;
    metrics.snapshots = snapshots.len();

    let points = build_dte_points(today, &expirations, &snapshots);
    metrics.points = points.len();

    let [iv7, iv30, iv60, iv90] = term_structure(&points);
    let result = IvTermResult {
        iv7,
        iv30,
        iv60,
        iv90,
        total_oi: sum_open_interest(&snapshots),
    };
    metrics.total_oi = result.total_oi;
    metrics.elapsed = started.elapsed();

    if !result.is_valid() {
        return Ok((result, metrics.empty(EmptyReason::NoIvPoints)));
    }
    Ok((result, metrics))
}

/// Rough wall-clock estimate for an IV batch, bounded by whichever limiter
/// needs more 30 second windows.
pub fn estimate_iv_fetch_time(
    symbol_count: usize,
    windows_per_symbol: usize,
    option_types: usize,
) -> Duration {
    let limits = (RateLimit::option_chain(), RateLimit::market_snapshot());
    let chain_calls = symbol_count * windows_per_symbol * option_types;
    let snapshot_calls = symbol_count;

    let chain_windows = chain_calls.div_ceil(limits.0.max_calls);
    let snapshot_windows = snapshot_calls.div_ceil(limits.1.max_calls);
    let windows = u32::try_from(chain_windows.max(snapshot_windows)).unwrap_or(u32::MAX);

    limits.0.window.saturating_mul(windows)
}
