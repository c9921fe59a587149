use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::errors::BrokerError;
use crate::session::{BrokerStatus, ConnectionSettings, SessionTracker};
use crate::worker::{ClientWorker, WorkerContext};

use super::analytics::{
    analyze_relative_momentum, benchmark_trend, fifty_two_week_range, rank_by_momentum,
    BenchmarkTrend, FiftyTwoWeekRange, RelativeMomentum,
};
use super::client::{BoxedHistoryClient, HistoricalDataApi, HistoryClientFactory};
use super::models::{
    Bar, BarRequest, ClosePoint, Contract, HistoryDuration, MarketDataType, PriceSnapshot,
};

/// Vendor name used in logs and status.
pub const HISTORY_VENDOR: &str = "ibkr";

/// Timeout for the VIX request.
const VIX_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between symbols in a relative momentum batch.
const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(500);

const RUNTIME_HINT: &str =
    "run blocking broker calls outside the async runtime or use the async entry points";

/// Qualifies `contract` and requests its daily bars, all on the worker thread.
fn request_bars<C: HistoricalDataApi + 'static>(
    ctx: &WorkerContext<C>,
    contract: &Contract,
    request: &BarRequest,
) -> Result<Vec<Bar>, BrokerError> {
    ctx.with_client(|client, rt| {
        rt.block_on(async {
            if !client.is_connected() {
                return Err(BrokerError::NotConnected {
                    vendor: HISTORY_VENDOR,
                });
            }
            let qualified = client
                .qualify_contract(contract)
                .await
                .map_err(|e| BrokerError::vendor(HISTORY_VENDOR, "qualify_contract", e))?;
            client
                .historical_bars(&qualified, request)
                .await
                .map_err(|e| BrokerError::vendor(HISTORY_VENDOR, "historical_bars", e))
        })
    })?
}

/// Qualifies `contract` and takes a market data snapshot of it.
fn request_snapshot<C: HistoricalDataApi + 'static>(
    ctx: &WorkerContext<C>,
    contract: &Contract,
) -> Result<PriceSnapshot, BrokerError> {
    ctx.with_client(|client, rt| {
        rt.block_on(async {
            if !client.is_connected() {
                return Err(BrokerError::NotConnected {
                    vendor: HISTORY_VENDOR,
                });
            }
            let qualified = client
                .qualify_contract(contract)
                .await
                .map_err(|e| BrokerError::vendor(HISTORY_VENDOR, "qualify_contract", e))?;
            client
                .price_snapshot(&qualified)
                .await
                .map_err(|e| BrokerError::vendor(HISTORY_VENDOR, "price_snapshot", e))
        })
    })?
}

/// History vendor connector: daily bars, VIX and relative momentum.
pub struct HistoryVendorConnector {
    worker: Arc<ClientWorker<BoxedHistoryClient>>,
    session: SessionTracker,
    default_settings: ConnectionSettings,
    batch_pause: Duration,
}

impl HistoryVendorConnector {
    pub fn new(default_settings: ConnectionSettings, factory: HistoryClientFactory) -> Self {
        Self {
            worker: Arc::new(ClientWorker::new(HISTORY_VENDOR, factory)),
            session: SessionTracker::new(HISTORY_VENDOR),
            default_settings,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }

    pub fn with_batch_pause(mut self, batch_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self
    }

    pub fn default_settings(&self) -> &ConnectionSettings {
        &self.default_settings
    }

    pub fn status(&self) -> BrokerStatus {
        self.session.snapshot()
    }

    pub async fn is_connected(&self) -> bool {
        if !self.worker.is_running() {
            return false;
        }
        self.worker
            .execute(|ctx| ctx.with_client(|client, _| client.is_connected()))
            .await
            .and_then(|connected| connected)
            .unwrap_or(false)
    }

    /// Connects and switches to the delayed feed. Already connected returns
    /// `true` without re-dialing.
    pub async fn connect(&self, settings: &ConnectionSettings) -> bool {
        if self.is_connected().await {
            info!("{}.connect already connected", HISTORY_VENDOR);
            return true;
        }
        self.session.begin_connect(settings);
        let started = Instant::now();

        let job_settings = settings.clone();
        let outcome = self
            .worker
            .execute(move |ctx| {
                ctx.with_client(|client, rt| {
                    rt.block_on(async {
                        client.connect(&job_settings).await?;
                        client.set_market_data_type(MarketDataType::Delayed).await
                    })
                })
            })
            .await
            .and_then(|connected| connected)
            .and_then(|connected| {
                connected.map_err(|e| BrokerError::vendor(HISTORY_VENDOR, "connect", e))
            });

        match outcome {
            Ok(()) => {
                self.session.mark_connected();
                info!(
                    "{}.connect connected to {} (client_id={:?}) in {}ms",
                    HISTORY_VENDOR,
                    settings.address(),
                    settings.client_id,
                    started.elapsed().as_millis()
                );
                true
            }
            Err(e) => {
                if e.is_incompatible_runtime() {
                    error!(
                        "{}.connect failed, incompatible runtime: {} ({})",
                        HISTORY_VENDOR, e, RUNTIME_HINT
                    );
                } else {
                    error!(
                        "{}.connect to {} failed: {}",
                        HISTORY_VENDOR,
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
            let disconnected = self
                .worker
                .execute(|ctx| {
                    ctx.with_client(|client, rt| {
                        if client.is_connected() {
                            rt.block_on(client.disconnect());
                        }
                    })
                })
                .await
                .and_then(|disconnected| disconnected);
            if let Err(e) = disconnected {
                warn!("{}.disconnect failed: {}", HISTORY_VENDOR, e);
            }
        }
        self.session.mark_disconnected();
        info!("{}.disconnect done", HISTORY_VENDOR);
    }

    /// Daily bars for `contract`, logged under `op`. Failures are logged and yield `None`.
    async fn fetch_bars(&self, op: &str, contract: Contract, request: BarRequest) -> Option<Vec<Bar>> {
        let symbol = contract.symbol.clone();
        let duration = request.duration;
        let started = Instant::now();

        let outcome = self
            .worker
            .execute(move |ctx| request_bars(ctx, &contract, &request))
            .await
            .and_then(|bars| bars);
        let elapsed_ms = started.elapsed().as_millis();

        match outcome {
            Ok(bars) if bars.is_empty() => {
                info!(
                    "{}.{} symbol={} duration={} status=empty bars=0 elapsed_ms={}",
                    HISTORY_VENDOR, op, symbol, duration, elapsed_ms
                );
                None
            }
            Ok(bars) => {
                info!(
                    "{}.{} symbol={} duration={} status=ok bars={} start={} end={} elapsed_ms={}",
                    HISTORY_VENDOR,
                    op,
                    symbol,
                    duration,
                    bars.len(),
                    bars[0].date,
                    bars[bars.len() - 1].date,
                    elapsed_ms
                );
                Some(bars)
            }
            Err(BrokerError::NotConnected { .. }) => {
                warn!(
                    "{}.{} symbol={} duration={} status=fail reason=not_connected",
                    HISTORY_VENDOR, op, symbol, duration
                );
                None
            }
            Err(e) => {
                error!(
                    "{}.{} symbol={} duration={} status=error elapsed_ms={} error={}",
                    HISTORY_VENDOR, op, symbol, duration, elapsed_ms, e
                );
                None
            }
        }
    }

    /// Daily closes, oldest first.
    pub async fn get_price_data(
        &self,
        symbol: &str,
        duration: HistoryDuration,
    ) -> Option<Vec<ClosePoint>> {
        let bars = self
            .fetch_bars("hist_close", Contract::stock(symbol), BarRequest::trades(duration))
            .await?;
        Some(bars.iter().map(ClosePoint::from).collect())
    }

    /// Daily OHLCV bars, oldest first.
    pub async fn get_ohlcv_data(&self, symbol: &str, duration: HistoryDuration) -> Option<Vec<Bar>> {
        self.fetch_bars("hist_ohlcv", Contract::stock(symbol), BarRequest::trades(duration))
            .await
    }

    /// Latest VIX close. Non-positive closes are treated as missing.
    pub async fn get_vix(&self) -> Option<f64> {
        let request = BarRequest::trades(HistoryDuration::days(1)).with_timeout(VIX_TIMEOUT);
        let bars = self.fetch_bars("vix", Contract::vix(), request).await?;
        let close = bars.last()?.close;
        if close.is_finite() && close > 0.0 {
            Some(close)
        } else {
            warn!("{}.vix status=invalid_value value={}", HISTORY_VENDOR, close);
            None
        }
    }

    /// Relative momentum of `symbol` against `benchmark` over the last 80 days.
    pub async fn analyze_sector_vs_benchmark(
        &self,
        symbol: &str,
        benchmark: &str,
    ) -> Option<RelativeMomentum> {
        let started = Instant::now();
        let duration = HistoryDuration::RELATIVE_MOMENTUM;

        let Some(sector) = self.get_price_data(symbol, duration).await else {
            warn!(
                "{}.relmom symbol={} benchmark={} status=empty reason=sector_data_empty elapsed_ms={}",
                HISTORY_VENDOR,
                symbol,
                benchmark,
                started.elapsed().as_millis()
            );
            return None;
        };
        let Some(bench) = self.get_price_data(benchmark, duration).await else {
            warn!(
                "{}.relmom symbol={} benchmark={} status=empty reason=benchmark_data_empty elapsed_ms={}",
                HISTORY_VENDOR,
                symbol,
                benchmark,
                started.elapsed().as_millis()
            );
            return None;
        };

        let result = analyze_relative_momentum(symbol, benchmark, &sector, &bench);
        match &result {
            Some(momentum) => info!(
                "{}.relmom symbol={} benchmark={} status=ok relmom={} strength={:?} elapsed_ms={}",
                HISTORY_VENDOR,
                symbol,
                benchmark,
                momentum
                    .rel_mom
                    .map_or_else(|| "N/A".to_string(), |v| format!("{:.4}", v)),
                momentum.strength,
                started.elapsed().as_millis()
            ),
            None => warn!(
                "{}.relmom symbol={} benchmark={} status=empty reason=no_common_dates",
                HISTORY_VENDOR, symbol, benchmark
            ),
        }
        result
    }

    /// Relative momentum for many symbols, strongest first. Symbols without
    /// data are left out.
    pub async fn batch_calculate_rel_mom(
        &self,
        symbols: &[String],
        benchmark: &str,
    ) -> Vec<RelativeMomentum> {
        let started = Instant::now();
        let total = symbols.len();
        let mut results = Vec::with_capacity(total);

        for (index, symbol) in symbols.iter().enumerate() {
            match self.analyze_sector_vs_benchmark(symbol, benchmark).await {
                Some(momentum) => {
                    info!(
                        "[{}/{}] {}: RS={:.4} RelMom={} [{:?}]",
                        index + 1,
                        total,
                        symbol,
                        momentum.rs,
                        momentum
                            .rel_mom
                            .map_or_else(|| "N/A".to_string(), |v| format!("{:.4}", v)),
                        momentum.strength
                    );
                    results.push(momentum);
                }
                None => warn!("[{}/{}] {}: no data", index + 1, total, symbol),
            }
            if !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        rank_by_momentum(&mut results);
        info!(
            "Relative momentum: {}/{} successful in {:.1}m",
            results.len(),
            total,
            started.elapsed().as_secs_f64() / 60.0
        );
        results
    }

    /// Current price from a market data snapshot: the last trade, else the close.
    pub async fn get_current_price(&self, symbol: &str) -> Option<f64> {
        let contract = Contract::stock(symbol);
        let symbol = contract.symbol.clone();
        let started = Instant::now();

        let outcome = self
            .worker
            .execute(move |ctx| request_snapshot(ctx, &contract))
            .await
            .and_then(|snapshot| snapshot);
        let elapsed_ms = started.elapsed().as_millis();

        match outcome {
            Ok(snapshot) => {
                let price = snapshot.price();
                if price.is_none() {
                    warn!(
                        "{}.price symbol={} status=empty last={:?} close={:?} elapsed_ms={}",
                        HISTORY_VENDOR, symbol, snapshot.last, snapshot.close, elapsed_ms
                    );
                }
                price
            }
            Err(BrokerError::NotConnected { .. }) => {
                error!(
                    "{}.price symbol={} status=fail reason=not_connected",
                    HISTORY_VENDOR, symbol
                );
                None
            }
            Err(e) => {
                error!(
                    "{}.price symbol={} status=error elapsed_ms={} error={}",
                    HISTORY_VENDOR, symbol, elapsed_ms, e
                );
                None
            }
        }
    }

    /// One year high, low and distance from each.
    pub async fn get_52_week_high_low(&self, symbol: &str) -> Option<FiftyTwoWeekRange> {
        let bars = self.get_ohlcv_data(symbol, HistoryDuration::ONE_YEAR).await?;
        fifty_two_week_range(symbol, &bars)
    }

    /// Benchmark price against its SMAs, plus SMA20 slope and 20-day return.
    pub async fn get_benchmark_with_sma(
        &self,
        symbol: &str,
        periods: &[usize],
    ) -> Option<BenchmarkTrend> {
        let bars = self.get_ohlcv_data(symbol, HistoryDuration::ONE_YEAR).await?;
        benchmark_trend(symbol, &bars, periods)
    }

    /// Disconnects and stops the worker thread.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.worker.shutdown().await;
    }
}
