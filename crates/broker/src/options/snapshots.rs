use std::collections::HashMap;

use log::warn;

use crate::errors::BrokerError;
use crate::rate_limiter::SlidingWindowLimiter;
use crate::worker::WorkerContext;

use super::client::OptionQuoteApi;
use super::models::{Expirations, SnapshotRecord};

/// Most codes the vendor accepts in one snapshot request.
pub const SNAPSHOT_BATCH_LIMIT: usize = 400;

/// Contract codes of every collected expiration, in expiry order.
pub fn contract_codes(expirations: &Expirations) -> Vec<String> {
    expirations
        .values()
        .flatten()
        .map(|contract| contract.code.clone())
        .collect()
}

/// Fetches snapshots for `codes` in limiter-gated chunks and indexes them by code.
///
/// A chunk the vendor answers with an error is logged and skipped. Transport
/// failures and a lost session propagate so the caller can retry the symbol.
pub fn fetch_snapshot_map<C: OptionQuoteApi + 'static>(
    ctx: &WorkerContext<C>,
    snapshot_limiter: &SlidingWindowLimiter,
    codes: &[String],
) -> Result<HashMap<String, SnapshotRecord>, BrokerError> {
    let mut snapshots = HashMap::with_capacity(codes.len());

    for (index, chunk) in codes.chunks(SNAPSHOT_BATCH_LIMIT).enumerate() {
        snapshot_limiter.acquire();
        match ctx.with_client(|client, rt| rt.block_on(client.market_snapshot(chunk)))? {
            Ok(rows) => {
                for record in rows.iter().filter_map(SnapshotRecord::from_vendor) {
                    snapshots.insert(record.code.clone(), record);
                }
            }
            Err(e) if e.is_vendor_answer() => {
                warn!(
                    "{} market_snapshot chunk {} ({} codes) skipped: {}",
                    ctx.vendor(),
                    index,
                    chunk.len(),
                    e
                );
            }
            Err(e) => return Err(BrokerError::vendor(ctx.vendor(), "market_snapshot", e)),
        }
    }

    Ok(snapshots)
}
