//! In-memory vendor clients for connector integration tests.
//!
//! Each fake shares its script and call counters with the test through an
//! `Arc<Mutex<..>>`, so the test can inspect what the worker thread did.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::json;

use radar_broker::history::{
    Bar, BarRequest, BoxedHistoryClient, Contract, HistoricalDataApi, HistoryClientFactory,
    HistoryVendorConnector, MarketDataType, PriceSnapshot,
};
use radar_broker::options::{
    BoxedOptionClient, ChainQuery, DateRangeParams, OptionClientFactory, OptionLimiters,
    OptionQuoteApi, OptionType, OptionsVendorConnector, VendorRecord,
};
use radar_broker::{ConnectionSettings, OiDeltaCache, RateLimit, RetryPolicy, VendorError};

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn record(value: serde_json::Value) -> VendorRecord {
    match value {
        serde_json::Value::Object(map) => map,
        _ => VendorRecord::new(),
    }
}

// =============================================================================
// Options
// =============================================================================

/// One scripted chain row.
#[derive(Clone, Debug)]
pub struct ScriptedContract {
    pub code: String,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
}

#[derive(Debug, Default)]
pub struct OptionScript {
    /// Underlying code to chain rows.
    pub chains: HashMap<String, Vec<ScriptedContract>>,
    /// Contract code to snapshot row.
    pub snapshots: HashMap<String, VendorRecord>,
    /// The only bounded parameter naming the client accepts; `None` accepts all.
    pub accepted_params: Option<DateRangeParams>,
    /// Snapshot requests that fail with a transport error before answering.
    pub snapshot_failures: usize,
    /// Snapshot requests that panic inside the client before answering.
    pub snapshot_panics: usize,
    /// 1-based snapshot request numbers the vendor answers with a rejection.
    pub rejected_snapshot_calls: Vec<usize>,
    /// Every chain request reports a lost session.
    pub lose_session_on_chain: bool,
    pub refuse_open: bool,

    pub open: bool,
    pub open_calls: usize,
    pub chain_calls: usize,
    pub snapshot_calls: usize,
    pub rejected_params: Vec<DateRangeParams>,
    pub unbounded_calls: usize,
    pub snapshot_batch_sizes: Vec<usize>,
}

impl OptionScript {
    /// Adds a call and a put expiring `dte` days from today.
    ///
    /// The call gets `delta` and `iv`; the put gets `-delta` and the same IV.
    pub fn add_expiry(&mut self, underlying: &str, dte: i64, delta: f64, iv: f64, oi: f64) {
        let expiry = today() + chrono::Duration::days(dte);
        let stamp = expiry.format("%y%m%d");
        let call = format!("{}{}C", underlying, stamp);
        let put = format!("{}{}P", underlying, stamp);

        let rows = self.chains.entry(underlying.to_string()).or_default();
        rows.push(ScriptedContract {
            code: call.clone(),
            option_type: OptionType::Call,
            expiry,
        });
        rows.push(ScriptedContract {
            code: put.clone(),
            option_type: OptionType::Put,
            expiry,
        });

        self.snapshots.insert(
            call.clone(),
            record(json!({
                "code": call,
                "option_delta": delta,
                "option_implied_volatility": iv,
                "option_open_interest": oi,
                "last_price": 2.5,
            })),
        );
        self.snapshots.insert(
            put.clone(),
            record(json!({
                "code": put,
                "option_delta": -delta,
                "option_implied_volatility": iv.to_string(),
                "option_open_interest": oi,
            })),
        );
    }

    /// Adds `strikes` calls expiring `dte` days out, deltas falling from 0.9 to 0.1.
    ///
    /// Every strike carries `iv` and an open interest of 10.
    pub fn add_call_ladder(&mut self, underlying: &str, dte: i64, strikes: usize, iv: f64) {
        let expiry = today() + chrono::Duration::days(dte);
        let stamp = expiry.format("%y%m%d");
        let step = 0.8 / strikes.saturating_sub(1).max(1) as f64;

        for i in 0..strikes {
            let code = format!("{}{}C{:04}", underlying, stamp, i);
            self.chains
                .entry(underlying.to_string())
                .or_default()
                .push(ScriptedContract {
                    code: code.clone(),
                    option_type: OptionType::Call,
                    expiry,
                });
            self.snapshots.insert(
                code.clone(),
                record(json!({
                    "code": code,
                    "option_delta": 0.9 - step * i as f64,
                    "option_implied_volatility": iv,
                    "option_open_interest": 10,
                })),
            );
        }
    }

    pub fn add_underlying_price(&mut self, code: &str, price: f64) {
        self.snapshots
            .insert(code.to_string(), record(json!({ "code": code, "last_price": price })));
    }
}

pub type SharedOptionScript = Arc<Mutex<OptionScript>>;

pub fn lock(script: &SharedOptionScript) -> MutexGuard<'_, OptionScript> {
    script.lock().unwrap()
}

pub struct FakeOptionClient {
    script: SharedOptionScript,
}

#[async_trait(?Send)]
impl OptionQuoteApi for FakeOptionClient {
    async fn open(&mut self, _settings: &ConnectionSettings) -> Result<(), VendorError> {
        let mut script = lock(&self.script);
        script.open_calls += 1;
        if script.refuse_open {
            return Err(VendorError::Transport("connection refused".to_string()));
        }
        script.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        lock(&self.script).open = false;
    }

    fn is_open(&self) -> bool {
        lock(&self.script).open
    }

    async fn option_chain(
        &mut self,
        code: &str,
        query: &ChainQuery,
    ) -> Result<Vec<VendorRecord>, VendorError> {
        let mut script = lock(&self.script);
        script.chain_calls += 1;
        if script.lose_session_on_chain {
            script.open = false;
            return Err(VendorError::NotConnected);
        }
        if !script.open {
            return Err(VendorError::NotConnected);
        }

        let range = match query.range {
            Some(range) => {
                if script.accepted_params.is_some_and(|accepted| accepted != range.params) {
                    script.rejected_params.push(range.params);
                    return Err(VendorError::UnsupportedParameters(format!(
                        "unknown keyword {}",
                        range.params.names().0
                    )));
                }
                Some((range.start, range.end))
            }
            None => {
                script.unbounded_calls += 1;
                None
            }
        };

        let rows = script
            .chains
            .get(code)
            .map(|contracts| {
                contracts
                    .iter()
                    .filter(|c| c.option_type == query.option_type)
                    .filter(|c| range.map_or(true, |(start, end)| c.expiry >= start && c.expiry <= end))
                    .map(|c| {
                        record(json!({
                            "code": c.code,
                            "option_type": c.option_type.as_str(),
                            "strike_time": format!("{} 00:00:00", c.expiry.format("%Y-%m-%d")),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn market_snapshot(&mut self, codes: &[String]) -> Result<Vec<VendorRecord>, VendorError> {
        let panic_now = {
            let mut script = lock(&self.script);
            let panic_now = script.open && script.snapshot_panics > 0;
            if panic_now {
                script.snapshot_calls += 1;
                script.snapshot_batch_sizes.push(codes.len());
                script.snapshot_panics -= 1;
            }
            panic_now
        };
        // Released above so the panic does not poison the script
        if panic_now {
            panic!("snapshot decoder crashed");
        }

        let mut script = lock(&self.script);
        script.snapshot_calls += 1;
        script.snapshot_batch_sizes.push(codes.len());
        if !script.open {
            return Err(VendorError::NotConnected);
        }
        let call = script.snapshot_calls;
        if script.rejected_snapshot_calls.contains(&call) {
            return Err(VendorError::Rejected {
                code: -1,
                message: "too many codes".to_string(),
            });
        }
        if script.snapshot_failures > 0 {
            script.snapshot_failures -= 1;
            return Err(VendorError::Transport("connection reset".to_string()));
        }
        Ok(codes
            .iter()
            .filter_map(|code| script.snapshots.get(code).cloned())
            .collect())
    }
}

pub fn option_client_factory(script: &SharedOptionScript) -> OptionClientFactory {
    let script = script.clone();
    Box::new(move || -> BoxedOptionClient { Box::new(FakeOptionClient { script }) })
}

pub fn fast_limiters() -> OptionLimiters {
    OptionLimiters::new(
        RateLimit::new(1000, Duration::from_secs(1)),
        RateLimit::new(1000, Duration::from_secs(1)),
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(4))
}

pub fn options_connector(
    script: &SharedOptionScript,
    oi_cache: Arc<OiDeltaCache>,
) -> OptionsVendorConnector {
    OptionsVendorConnector::new(
        ConnectionSettings::options("127.0.0.1", 11111, "US"),
        fast_limiters(),
        oi_cache,
        option_client_factory(script),
    )
    .with_retry_policy(fast_retry())
}

// =============================================================================
// History
// =============================================================================

#[derive(Debug, Default)]
pub struct HistoryScript {
    /// Symbol to daily bars, oldest first.
    pub bars: HashMap<String, Vec<Bar>>,
    /// Symbol to market data snapshot.
    pub quotes: HashMap<String, PriceSnapshot>,
    pub refuse_connect: bool,

    pub connected: bool,
    pub connect_calls: usize,
    pub market_data_type: Option<MarketDataType>,
    pub requests: Vec<(String, BarRequest)>,
    pub snapshot_requests: Vec<String>,
}

impl HistoryScript {
    /// Daily bars ending today with the given closes.
    pub fn add_closes(&mut self, symbol: &str, closes: &[f64]) {
        let end = today();
        let count = closes.len() as i64;
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: end - chrono::Duration::days(count - 1 - i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000.0,
            })
            .collect();
        self.bars.insert(symbol.to_string(), bars);
    }

    pub fn add_quote(&mut self, symbol: &str, last: Option<f64>, close: Option<f64>) {
        self.quotes
            .insert(symbol.to_string(), PriceSnapshot { last, close });
    }
}

pub type SharedHistoryScript = Arc<Mutex<HistoryScript>>;

pub fn lock_history(script: &SharedHistoryScript) -> MutexGuard<'_, HistoryScript> {
    script.lock().unwrap()
}

pub struct FakeHistoryClient {
    script: SharedHistoryScript,
}

#[async_trait(?Send)]
impl HistoricalDataApi for FakeHistoryClient {
    async fn connect(&mut self, _settings: &ConnectionSettings) -> Result<(), VendorError> {
        let mut script = lock_history(&self.script);
        script.connect_calls += 1;
        if script.refuse_connect {
            return Err(VendorError::Transport("connection refused".to_string()));
        }
        script.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        lock_history(&self.script).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock_history(&self.script).connected
    }

    async fn set_market_data_type(&mut self, kind: MarketDataType) -> Result<(), VendorError> {
        lock_history(&self.script).market_data_type = Some(kind);
        Ok(())
    }

    async fn qualify_contract(&mut self, contract: &Contract) -> Result<Contract, VendorError> {
        let script = lock_history(&self.script);
        if !script.bars.contains_key(&contract.symbol) && !script.quotes.contains_key(&contract.symbol) {
            return Err(VendorError::Rejected {
                code: 200,
                message: format!("No security definition has been found for {}", contract.symbol),
            });
        }
        let mut qualified = contract.clone();
        qualified.con_id = Some(1000 + contract.symbol.len() as i64);
        Ok(qualified)
    }

    async fn historical_bars(
        &mut self,
        contract: &Contract,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, VendorError> {
        let mut script = lock_history(&self.script);
        script
            .requests
            .push((contract.symbol.clone(), request.clone()));
        Ok(script.bars.get(&contract.symbol).cloned().unwrap_or_default())
    }

    async fn price_snapshot(&mut self, contract: &Contract) -> Result<PriceSnapshot, VendorError> {
        let mut script = lock_history(&self.script);
        script.snapshot_requests.push(contract.symbol.clone());
        Ok(script.quotes.get(&contract.symbol).copied().unwrap_or_default())
    }
}

pub fn history_client_factory(script: &SharedHistoryScript) -> HistoryClientFactory {
    let script = script.clone();
    Box::new(move || -> BoxedHistoryClient { Box::new(FakeHistoryClient { script }) })
}

pub fn history_connector(script: &SharedHistoryScript) -> HistoryVendorConnector {
    HistoryVendorConnector::new(
        ConnectionSettings::history("127.0.0.1", 4002, 3),
        history_client_factory(script),
    )
    .with_batch_pause(Duration::ZERO)
}
