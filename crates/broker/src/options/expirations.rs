//! Expiration collection: which contracts expire inside the horizon.

use chrono::{Duration, NaiveDate};
use log::{debug, warn};

use crate::errors::{BrokerError, RetryClass, VendorError};
use crate::rate_limiter::SlidingWindowLimiter;
use crate::worker::WorkerContext;

use super::client::{ChainQuery, DateRangeParams, OptionQuoteApi};
use super::models::{Expirations, OptionContract, OptionType};
use super::records::{self, VendorRecord};

/// Width of one chain request window, in days.
pub const WINDOW_DAYS: i64 = 30;

/// Splits `[start, end]` into consecutive inclusive windows of at most
/// `WINDOW_DAYS + 1` days.
pub fn chain_windows(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut window_start = start;
    while window_start <= end {
        let window_end = (window_start + Duration::days(WINDOW_DAYS)).min(end);
        windows.push((window_start, window_end));
        window_start = window_end + Duration::days(1);
    }
    windows
}

/// Requests one chain, walking the parameter-name variants until the client
/// accepts one and falling back to an unbounded request.
fn request_chain<C: OptionQuoteApi + 'static>(
    ctx: &WorkerContext<C>,
    code: &str,
    option_type: OptionType,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<VendorRecord>, BrokerError> {
    for params in DateRangeParams::ORDERED {
        let query = ChainQuery::bounded(option_type, params, start, end);
        match ctx.with_client(|client, rt| rt.block_on(client.option_chain(code, &query)))? {
            Ok(rows) => return Ok(rows),
            Err(VendorError::UnsupportedParameters(reason)) => {
                debug!(
                    "{} option_chain rejected {:?} for {}: {}",
                    ctx.vendor(),
                    params.names(),
                    code,
                    reason
                );
            }
            Err(e) => return Err(BrokerError::vendor(ctx.vendor(), "option_chain", e)),
        }
    }

    let query = ChainQuery::unbounded(option_type);
    ctx.with_client(|client, rt| rt.block_on(client.option_chain(code, &query)))?
        .map_err(|e| BrokerError::vendor(ctx.vendor(), "option_chain", e))
}

/// Groups chain rows by expiry. Rows missing an expiry or a code are ignored.
fn group_rows(expirations: &mut Expirations, rows: &[VendorRecord], option_type: OptionType) {
    for row in rows {
        let (Some(expiry), Some(code)) = (
            records::expiry_field(row),
            records::string_field(row, records::CONTRACT_CODE_KEYS),
        ) else {
            continue;
        };
        expirations
            .entry(expiry.clone())
            .or_default()
            .push(OptionContract {
                code,
                option_type,
                expiry,
            });
    }
}

/// Collects calls and puts expiring in `[start, end]` for `code`.
///
/// Every window and side costs one chain-limiter slot. A window that fails is
/// logged and skipped; only a lost session (or a local failure) stops collection.
pub fn collect_expirations<C: OptionQuoteApi + 'static>(
    ctx: &WorkerContext<C>,
    chain_limiter: &SlidingWindowLimiter,
    code: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Expirations, BrokerError> {
    let mut expirations = Expirations::new();

    for (window_start, window_end) in chain_windows(start, end) {
        for option_type in OptionType::ALL {
            chain_limiter.acquire();
            match request_chain(ctx, code, option_type, window_start, window_end) {
                Ok(rows) => group_rows(&mut expirations, &rows, option_type),
                Err(e @ BrokerError::Vendor { .. }) if e.retry_class() != RetryClass::AbortBatch => {
                    warn!(
                        "{} option_chain {} {} {}..{} skipped: {}",
                        ctx.vendor(),
                        code,
                        option_type,
                        window_start,
                        window_end,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(expirations)
}
