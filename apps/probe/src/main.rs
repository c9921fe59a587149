use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use radar_broker::options::estimate_iv_fetch_time;
use radar_broker::{
    BrokerConfig, BrokerContext, BrokerContextStatus, IvTermResult, DEFAULT_MAX_DAYS,
    DEFAULT_MAX_RETRIES,
};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SYMBOLS: &[&str] = &["SPY"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SymbolReport {
    iv: IvTermResult,
    current_oi: Option<i64>,
    delta_oi_1d: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeReport {
    generated_at: DateTime<Utc>,
    elapsed_ms: u128,
    vix: Option<f64>,
    symbols: BTreeMap<String, SymbolReport>,
    status: BrokerContextStatus,
}

fn init_tracing() {
    let log_format = std::env::var("RADAR_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

fn symbols_from_args() -> Vec<String> {
    let symbols: Vec<String> = std::env::args()
        .skip(1)
        .map(|arg| arg.trim().to_uppercase())
        .filter(|arg| !arg.is_empty())
        .collect();
    if symbols.is_empty() {
        DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else {
        symbols
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = BrokerConfig::from_env();
    let symbols = symbols_from_args();
    tracing::info!(
        "Probing {} symbols, estimated IV fetch time {:?}",
        symbols.len(),
        estimate_iv_fetch_time(symbols.len(), 4, 2)
    );

    let started = Instant::now();
    let context = BrokerContext::new(config);
    let (history_ok, options_ok) = context.connect_all().await;
    if !history_ok && !options_ok {
        tracing::warn!("No vendor connected, report will be empty");
    }

    let history = context.history();
    let options = context.options();

    let vix = history.get_vix().await;
    let iv_terms = options
        .fetch_iv_terms(&symbols, DEFAULT_MAX_DAYS, DEFAULT_MAX_RETRIES)
        .await;

    let readings: HashMap<String, Option<i64>> = iv_terms
        .iter()
        .map(|(symbol, result)| (symbol.clone(), result.total_oi))
        .collect();
    let deltas = options.batch_compute_delta_oi(readings).await;

    let symbols = iv_terms
        .into_iter()
        .map(|(symbol, iv)| {
            let (current_oi, delta_oi_1d) = deltas.get(&symbol).copied().unwrap_or((None, None));
            (
                symbol,
                SymbolReport {
                    iv,
                    current_oi,
                    delta_oi_1d,
                },
            )
        })
        .collect();

    let report = ProbeReport {
        generated_at: Utc::now(),
        elapsed_ms: started.elapsed().as_millis(),
        vix,
        symbols,
        status: context.status(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    context.shutdown().await;
    Ok(())
}
