//! Capability traits for the two vendors and the constructors that pick a real or
//! unavailable implementation.
//!
//! Callers hold `Arc<dyn HistoryConnector>` / `Arc<dyn OptionsConnector>` and never
//! need to know whether a vendor is actually wired up. The unavailable variants
//! answer every data call with "no data" instead of failing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::config::{HistoryConfig, OptionsConfig};
use crate::history::{
    Bar, BenchmarkTrend, BoxedHistoryClient, ClientPortalClient, ClosePoint, FiftyTwoWeekRange,
    HistoryClientFactory, HistoryDuration, HistoryVendorConnector, RelativeMomentum,
    HISTORY_VENDOR,
};
use crate::open_interest::{OiDelta, OiDeltaCache};
use crate::options::{
    IvTermResult, OptionClientFactory, OptionLimiters, OptionsVendorConnector, OPTIONS_VENDOR,
};
use crate::session::{BrokerStatus, ConnectionSettings};

/// Default IV fetch horizon in calendar days.
pub const DEFAULT_MAX_DAYS: u32 = 120;

/// Default per-symbol retry budget for IV fetches.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Daily bars, VIX and relative momentum.
#[async_trait]
pub trait HistoryConnector: Send + Sync {
    fn vendor(&self) -> &'static str;

    fn status(&self) -> BrokerStatus;

    /// Returns `false` on failure; never errors.
    async fn connect(&self, settings: &ConnectionSettings) -> bool;

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    async fn get_price_data(
        &self,
        symbol: &str,
        duration: HistoryDuration,
    ) -> Option<Vec<ClosePoint>>;

    async fn get_ohlcv_data(&self, symbol: &str, duration: HistoryDuration) -> Option<Vec<Bar>>;

    async fn get_vix(&self) -> Option<f64>;

    /// Last trade, falling back to the close.
    async fn get_current_price(&self, symbol: &str) -> Option<f64>;

    async fn analyze_sector_vs_benchmark(
        &self,
        symbol: &str,
        benchmark: &str,
    ) -> Option<RelativeMomentum>;

    async fn batch_calculate_rel_mom(
        &self,
        symbols: &[String],
        benchmark: &str,
    ) -> Vec<RelativeMomentum>;

    async fn get_52_week_high_low(&self, symbol: &str) -> Option<FiftyTwoWeekRange>;

    async fn get_benchmark_with_sma(
        &self,
        symbol: &str,
        periods: &[usize],
    ) -> Option<BenchmarkTrend>;

    /// Disconnects and releases the vendor worker.
    async fn shutdown(&self);
}

/// IV term structures and open-interest deltas.
#[async_trait]
pub trait OptionsConnector: Send + Sync {
    fn vendor(&self) -> &'static str;

    fn status(&self) -> BrokerStatus;

    /// Returns `false` on failure; never errors.
    async fn connect(&self, settings: &ConnectionSettings) -> bool;

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;

    /// One entry per requested symbol; failures map to `IvTermResult::default()`.
    async fn fetch_iv_terms(
        &self,
        symbols: &[String],
        max_days: u32,
        max_retries: u32,
    ) -> HashMap<String, IvTermResult>;

    async fn batch_compute_delta_oi(
        &self,
        readings: HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta>;

    async fn get_current_price(&self, symbol: &str) -> Option<f64>;

    /// Disconnects and releases the vendor worker.
    async fn shutdown(&self);
}

#[async_trait]
impl HistoryConnector for HistoryVendorConnector {
    fn vendor(&self) -> &'static str {
        HISTORY_VENDOR
    }

    fn status(&self) -> BrokerStatus {
        HistoryVendorConnector::status(self)
    }

    async fn connect(&self, settings: &ConnectionSettings) -> bool {
        HistoryVendorConnector::connect(self, settings).await
    }

    async fn disconnect(&self) {
        HistoryVendorConnector::disconnect(self).await
    }

    async fn is_connected(&self) -> bool {
        HistoryVendorConnector::is_connected(self).await
    }

    async fn get_price_data(
        &self,
        symbol: &str,
        duration: HistoryDuration,
    ) -> Option<Vec<ClosePoint>> {
        HistoryVendorConnector::get_price_data(self, symbol, duration).await
    }

    async fn get_ohlcv_data(&self, symbol: &str, duration: HistoryDuration) -> Option<Vec<Bar>> {
        HistoryVendorConnector::get_ohlcv_data(self, symbol, duration).await
    }

    async fn get_vix(&self) -> Option<f64> {
        HistoryVendorConnector::get_vix(self).await
    }

    async fn get_current_price(&self, symbol: &str) -> Option<f64> {
        HistoryVendorConnector::get_current_price(self, symbol).await
    }

    async fn analyze_sector_vs_benchmark(
        &self,
        symbol: &str,
        benchmark: &str,
    ) -> Option<RelativeMomentum> {
        HistoryVendorConnector::analyze_sector_vs_benchmark(self, symbol, benchmark).await
    }

    async fn batch_calculate_rel_mom(
        &self,
        symbols: &[String],
        benchmark: &str,
    ) -> Vec<RelativeMomentum> {
        HistoryVendorConnector::batch_calculate_rel_mom(self, symbols, benchmark).await
    }

    async fn get_52_week_high_low(&self, symbol: &str) -> Option<FiftyTwoWeekRange> {
        HistoryVendorConnector::get_52_week_high_low(self, symbol).await
    }

    async fn get_benchmark_with_sma(
        &self,
        symbol: &str,
        periods: &[usize],
    ) -> Option<BenchmarkTrend> {
        HistoryVendorConnector::get_benchmark_with_sma(self, symbol, periods).await
    }

    async fn shutdown(&self) {
        HistoryVendorConnector::shutdown(self).await
    }
}

#[async_trait]
impl OptionsConnector for OptionsVendorConnector {
    fn vendor(&self) -> &'static str {
        OPTIONS_VENDOR
    }

    fn status(&self) -> BrokerStatus {
        OptionsVendorConnector::status(self)
    }

    async fn connect(&self, settings: &ConnectionSettings) -> bool {
        OptionsVendorConnector::connect(self, settings).await
    }

    async fn disconnect(&self) {
        OptionsVendorConnector::disconnect(self).await
    }

    async fn is_connected(&self) -> bool {
        OptionsVendorConnector::is_connected(self).await
    }

    async fn fetch_iv_terms(
        &self,
        symbols: &[String],
        max_days: u32,
        max_retries: u32,
    ) -> HashMap<String, IvTermResult> {
        OptionsVendorConnector::fetch_iv_terms(self, symbols, max_days, max_retries).await
    }

    async fn batch_compute_delta_oi(
        &self,
        readings: HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta> {
        OptionsVendorConnector::batch_compute_delta_oi(self, readings).await
    }

    async fn get_current_price(&self, symbol: &str) -> Option<f64> {
        OptionsVendorConnector::get_current_price(self, symbol).await
    }

    async fn shutdown(&self) {
        OptionsVendorConnector::shutdown(self).await
    }
}

/// Stand-in for a disabled history vendor.
pub struct UnavailableHistoryConnector {
    reason: String,
}

impl UnavailableHistoryConnector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl HistoryConnector for UnavailableHistoryConnector {
    fn vendor(&self) -> &'static str {
        HISTORY_VENDOR
    }

    fn status(&self) -> BrokerStatus {
        BrokerStatus::unavailable(HISTORY_VENDOR, self.reason.clone())
    }

    async fn connect(&self, _settings: &ConnectionSettings) -> bool {
        warn!("{} unavailable: {}", HISTORY_VENDOR, self.reason);
        false
    }

    async fn disconnect(&self) {}

    async fn is_connected(&self) -> bool {
        false
    }

    async fn get_price_data(
        &self,
        _symbol: &str,
        _duration: HistoryDuration,
    ) -> Option<Vec<ClosePoint>> {
        None
    }

    async fn get_ohlcv_data(&self, _symbol: &str, _duration: HistoryDuration) -> Option<Vec<Bar>> {
        None
    }

    async fn get_vix(&self) -> Option<f64> {
        None
    }

    async fn get_current_price(&self, _symbol: &str) -> Option<f64> {
        None
    }

    async fn analyze_sector_vs_benchmark(
        &self,
        _symbol: &str,
        _benchmark: &str,
    ) -> Option<RelativeMomentum> {
        None
    }

    async fn batch_calculate_rel_mom(
        &self,
        _symbols: &[String],
        _benchmark: &str,
    ) -> Vec<RelativeMomentum> {
        Vec::new()
    }

    async fn get_52_week_high_low(&self, _symbol: &str) -> Option<FiftyTwoWeekRange> {
        None
    }

    async fn get_benchmark_with_sma(
        &self,
        _symbol: &str,
        _periods: &[usize],
    ) -> Option<BenchmarkTrend> {
        None
    }

    async fn shutdown(&self) {}
}

/// Stand-in for a disabled options vendor.
///
/// IV requests yield default results. OI deltas still go through the cache, which
/// only needs the readings the caller already has.
pub struct UnavailableOptionsConnector {
    reason: String,
    oi_cache: Arc<OiDeltaCache>,
}

impl UnavailableOptionsConnector {
    pub fn new(reason: impl Into<String>, oi_cache: Arc<OiDeltaCache>) -> Self {
        Self {
            reason: reason.into(),
            oi_cache,
        }
    }
}

#[async_trait]
impl OptionsConnector for UnavailableOptionsConnector {
    fn vendor(&self) -> &'static str {
        OPTIONS_VENDOR
    }

    fn status(&self) -> BrokerStatus {
        BrokerStatus::unavailable(OPTIONS_VENDOR, self.reason.clone())
    }

    async fn connect(&self, _settings: &ConnectionSettings) -> bool {
        warn!("{} unavailable: {}", OPTIONS_VENDOR, self.reason);
        false
    }

    async fn disconnect(&self) {}

    async fn is_connected(&self) -> bool {
        false
    }

    async fn fetch_iv_terms(
        &self,
        symbols: &[String],
        _max_days: u32,
        _max_retries: u32,
    ) -> HashMap<String, IvTermResult> {
        symbols
            .iter()
            .map(|symbol| (symbol.clone(), IvTermResult::default()))
            .collect()
    }

    async fn batch_compute_delta_oi(
        &self,
        readings: HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta> {
        let cache = self.oi_cache.clone();
        let fallback: HashMap<String, OiDelta> = readings
            .iter()
            .map(|(symbol, current)| (symbol.clone(), (*current, None)))
            .collect();
        tokio::task::spawn_blocking(move || cache.batch_compute_delta(&readings))
            .await
            .unwrap_or(fallback)
    }

    async fn get_current_price(&self, _symbol: &str) -> Option<f64> {
        None
    }

    async fn shutdown(&self) {}
}

/// History connector for `config`.
///
/// Without an explicit `client_factory` the Client Portal REST client is used.
pub fn create_history_connector(
    config: &HistoryConfig,
    client_factory: Option<HistoryClientFactory>,
) -> Arc<dyn HistoryConnector> {
    if !config.enabled {
        info!("{} disabled by configuration", HISTORY_VENDOR);
        return Arc::new(UnavailableHistoryConnector::new("disabled by configuration"));
    }

    let factory: HistoryClientFactory = match client_factory {
        Some(factory) => factory,
        None => {
            let gateway_url = config.gateway_url.clone();
            let timeout = Duration::from_secs(config.timeout_secs);
            Box::new(move || -> BoxedHistoryClient {
                let client = ClientPortalClient::new(timeout);
                match gateway_url {
                    Some(url) => Box::new(client.with_gateway_url(url)),
                    None => Box::new(client),
                }
            })
        }
    };
    Arc::new(HistoryVendorConnector::new(config.settings(), factory))
}

/// Options connector for `config`.
///
/// The options vendor has no built-in client; without `client_factory` the
/// unavailable connector is returned.
pub fn create_options_connector(
    config: &OptionsConfig,
    oi_cache: Arc<OiDeltaCache>,
    client_factory: Option<OptionClientFactory>,
) -> Arc<dyn OptionsConnector> {
    if !config.enabled {
        info!("{} disabled by configuration", OPTIONS_VENDOR);
        return Arc::new(UnavailableOptionsConnector::new(
            "disabled by configuration",
            oi_cache,
        ));
    }
    let Some(factory) = client_factory else {
        warn!("{} enabled but no client was provided", OPTIONS_VENDOR);
        return Arc::new(UnavailableOptionsConnector::new(
            "no options client configured",
            oi_cache,
        ));
    };

    let limiters = OptionLimiters::new(config.chain_limit, config.snapshot_limit);
    Arc::new(OptionsVendorConnector::new(
        config.settings(),
        limiters,
        oi_cache,
        factory,
    ))
}
