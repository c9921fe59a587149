use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use log::{error, info, warn};

use crate::errors::{BrokerError, RetryClass};
use crate::open_interest::{OiDelta, OiDeltaCache};
use crate::retry::RetryPolicy;
use crate::session::{BrokerStatus, ConnectionSettings, SessionTracker};
use crate::worker::ClientWorker;

use super::client::{BoxedOptionClient, OptionClientFactory};
use super::models::{fmt_iv, IvTermResult, SnapshotRecord};
use super::pipeline::{fetch_symbol_iv_terms, format_code, OptionLimiters};

/// Vendor name used in logs and status.
pub const OPTIONS_VENDOR: &str = "futu";

/// Default market prefix for symbol codes.
const DEFAULT_MARKET: &str = "US";

const RUNTIME_HINT: &str =
    "run blocking broker calls outside the async runtime or use the async entry points";

/// Options vendor connector: IV term structures and OI deltas.
///
/// The vendor client lives on a dedicated worker thread; every call into it is a
/// job on that thread.
pub struct OptionsVendorConnector {
    worker: Arc<ClientWorker<BoxedOptionClient>>,
    session: SessionTracker,
    default_settings: ConnectionSettings,
    limiters: Arc<OptionLimiters>,
    oi_cache: Arc<OiDeltaCache>,
    retry: RetryPolicy,
}

impl OptionsVendorConnector {
    pub fn new(
        default_settings: ConnectionSettings,
        limiters: OptionLimiters,
        oi_cache: Arc<OiDeltaCache>,
        factory: OptionClientFactory,
    ) -> Self {
        Self {
            worker: Arc::new(ClientWorker::new(OPTIONS_VENDOR, factory)),
            session: SessionTracker::new(OPTIONS_VENDOR),
            default_settings,
            limiters: Arc::new(limiters),
            oi_cache,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the backoff delays used between per-symbol retries.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn oi_cache(&self) -> &Arc<OiDeltaCache> {
        &self.oi_cache
    }

    fn market(&self) -> String {
        self.session
            .settings()
            .and_then(|settings| settings.market)
            .or_else(|| self.default_settings.market.clone())
            .unwrap_or_else(|| DEFAULT_MARKET.to_string())
    }

    pub fn status(&self) -> BrokerStatus {
        self.session.snapshot()
    }

    pub async fn is_connected(&self) -> bool {
        if !self.worker.is_running() {
            return false;
        }
        self.worker
            .execute(|ctx| ctx.with_client(|client, _| client.is_open()))
            .await
            .and_then(|open| open)
            .unwrap_or(false)
    }

    /// Opens the quote session. Already connected returns `true` without re-dialing.
    pub async fn connect(&self, settings: &ConnectionSettings) -> bool {
        if self.is_connected().await {
            return true;
        }
        self.session.begin_connect(settings);
        let started = Instant::now();

        let job_settings = settings.clone();
        let outcome = self
            .worker
            .execute(move |ctx| {
                ctx.with_client(|client, rt| rt.block_on(client.open(&job_settings)))
            })
            .await
            .and_then(|opened| opened)
            .and_then(|opened| {
                opened.map_err(|e| BrokerError::vendor(OPTIONS_VENDOR, "connect", e))
            });

        match outcome {
            Ok(()) => {
                self.session.mark_connected();
                info!(
                    "{}.connect connected to {} in {}ms",
                    OPTIONS_VENDOR,
                    settings.address(),
                    started.elapsed().as_millis()
                );
                true
            }
            Err(e) => {
                if e.is_incompatible_runtime() {
                    error!(
                        "{}.connect failed, incompatible runtime: {} ({})",
                        OPTIONS_VENDOR, e, RUNTIME_HINT
                    );
                } else {
                    error!(
                        "{}.connect to {} failed: {}",
                        OPTIONS_VENDOR,
                        settings.address(),
                        e
                    );
                }
                self.session.mark_failed(e.to_string());
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        if self.worker.is_running() {
            let closed = self
                .worker
                .execute(|ctx| ctx.with_client(|client, rt| rt.block_on(client.close())))
                .await
                .and_then(|closed| closed);
            if let Err(e) = closed {
                warn!("{}.disconnect failed: {}", OPTIONS_VENDOR, e);
            }
        }
        self.session.mark_disconnected();
        info!("{}.disconnect done", OPTIONS_VENDOR);
    }

    /// IV term structure for every symbol.
    ///
    /// Always returns an entry per symbol: failures yield
    /// `IvTermResult::default()`. Losing the session mid-batch stops vendor calls
    /// and fills the remaining symbols with defaults.
    pub async fn fetch_iv_terms(
        &self,
        symbols: &[String],
        max_days: u32,
        max_retries: u32,
    ) -> HashMap<String, IvTermResult> {
        if !self.is_connected().await {
            self.connect(&self.default_settings).await;
        }

        let market = self.market();
        let policy = self.retry.with_max_retries(max_retries);
        let total = symbols.len();
        let started = Instant::now();
        let mut results = HashMap::with_capacity(total);

        for (index, symbol) in symbols.iter().enumerate() {
            let code = format_code(&market, symbol);
            let today = Local::now().date_naive();

            // One worker job per attempt
            let outcome = policy
                .retry(symbol, |_| {
                    let worker = self.worker.clone();
                    let limiters = self.limiters.clone();
                    let job_symbol = symbol.clone();
                    let code = code.clone();
                    async move {
                        worker
                            .execute(move |ctx| {
                                fetch_symbol_iv_terms(
                                    ctx,
                                    &limiters,
                                    &job_symbol,
                                    &code,
                                    today,
                                    max_days,
                                )
                            })
                            .await
                            .and_then(|fetched| fetched)
                    }
                })
                .await;

            match outcome {
                Ok((result, metrics)) => {
                    metrics.log(OPTIONS_VENDOR, "iv_terms");
                    info!(
                        "[{}/{}] {}: IV7={} IV30={} IV60={} IV90={}",
                        index + 1,
                        total,
                        symbol,
                        fmt_iv(result.iv7),
                        fmt_iv(result.iv30),
                        fmt_iv(result.iv60),
                        fmt_iv(result.iv90)
                    );
                    results.insert(symbol.clone(), result);
                }
                Err(e) if e.retry_class() == RetryClass::AbortBatch => {
                    error!(
                        "{}: IV fetch aborted, {} symbols left without data: {}",
                        symbol,
                        total - index,
                        e
                    );
                    for remaining in &symbols[index..] {
                        results.insert(remaining.clone(), IvTermResult::default());
                    }
                    break;
                }
                Err(e) => {
                    error!("{}: IV fetch failed: {}", symbol, e);
                    results.insert(symbol.clone(), IvTermResult::default());
                }
            }
        }

        let success = results.values().filter(|r| r.is_valid()).count();
        info!(
            "IV terms: {}/{} successful in {:.1}m",
            success,
            total,
            started.elapsed().as_secs_f64() / 60.0
        );
        results
    }

    /// One-day OI deltas for every symbol, persisted to the OI cache.
    pub async fn batch_compute_delta_oi(
        &self,
        readings: HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta> {
        let cache = self.oi_cache.clone();
        let fallback: HashMap<String, OiDelta> = readings
            .iter()
            .map(|(symbol, current)| (symbol.clone(), (*current, None)))
            .collect();

        match tokio::task::spawn_blocking(move || cache.batch_compute_delta(&readings)).await {
            Ok(results) => results,
            Err(e) => {
                error!("OI delta computation failed: {}", e);
                fallback
            }
        }
    }

    /// Last traded price from a market snapshot, when connected.
    pub async fn get_current_price(&self, symbol: &str) -> Option<f64> {
        if !self.is_connected().await {
            return None;
        }
        let codes = vec![format_code(&self.market(), symbol)];
        let limiters = self.limiters.clone();

        let outcome = self
            .worker
            .execute(move |ctx| {
                limiters.snapshot.acquire();
                ctx.with_client(|client, rt| rt.block_on(client.market_snapshot(&codes)))
            })
            .await
            .and_then(|rows| rows)
            .and_then(|rows| {
                rows.map_err(|e| BrokerError::vendor(OPTIONS_VENDOR, "market_snapshot", e))
            });

        match outcome {
            Ok(rows) => rows
                .iter()
                .find_map(SnapshotRecord::from_vendor)
                .and_then(|record| record.last_price),
            Err(e) => {
                error!("{}: current price failed: {}", symbol, e);
                None
            }
        }
    }

    /// Closes the session and stops the worker thread.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.worker.shutdown().await;
    }
}
