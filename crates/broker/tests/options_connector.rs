//! Options connector against an in-memory options vendor.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tempfile::TempDir;

use common::{lock, options_connector, today, OptionScript, SharedOptionScript};
use radar_broker::options::{DateRangeParams, IvTermResult, OptionsVendorConnector};
use radar_broker::{ConnectionState, OiDeltaCache};

fn approx(value: Option<f64>, expected: f64) -> bool {
    value.is_some_and(|v| (v - expected).abs() < 1e-6)
}

fn setup(script: OptionScript) -> (SharedOptionScript, OptionsVendorConnector, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(OiDeltaCache::new(dir.path().join("oi_cache.json")));
    let script = Arc::new(Mutex::new(script));
    let connector = options_connector(&script, cache);
    (script, connector, dir)
}

/// Two expiries, 10 and 40 days out, with ATM IVs of 20% and 25%.
fn spy_script() -> OptionScript {
    let mut script = OptionScript::default();
    script.add_expiry("US.SPY", 10, 0.52, 0.20, 1000.0);
    script.add_expiry("US.SPY", 40, 0.49, 0.25, 1500.0);
    script
}

fn symbols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_symbol_without_options_yields_default_result() {
    let (script, connector, _dir) = setup(OptionScript::default());

    let results = connector
        .fetch_iv_terms(&symbols(&["NO_OPTIONS"]), 120, 2)
        .await;

    assert_eq!(
        results,
        HashMap::from([("NO_OPTIONS".to_string(), IvTermResult::default())])
    );
    let script = lock(&script);
    // 4 windows of up to 31 days, calls and puts
    assert_eq!(script.chain_calls, 8);
    assert_eq!(script.snapshot_calls, 0);
    assert_eq!(script.open_calls, 1);

    drop(script);
    connector.shutdown().await;
}

#[tokio::test]
async fn test_full_pipeline_interpolates_term_structure() {
    let (script, connector, _dir) = setup(spy_script());

    let results = connector.fetch_iv_terms(&symbols(&["SPY"]), 120, 2).await;
    let spy = results["SPY"];

    assert!(spy.is_valid());
    // Before the first expiry: nearest point, no extrapolation
    assert!(approx(spy.iv7, 20.0));
    // Variance-linear between (10, 20%) and (40, 25%)
    assert!(approx(spy.iv30, 0.055_f64.sqrt() * 100.0));
    assert!(approx(spy.iv60, 25.0));
    assert!(approx(spy.iv90, 25.0));
    assert_eq!(spy.total_oi, Some(5000));

    let script = lock(&script);
    assert_eq!(script.snapshot_calls, 1);
    assert_eq!(script.snapshot_batch_sizes, vec![4]);
    assert_eq!(script.unbounded_calls, 0);

    drop(script);
    connector.shutdown().await;
}

#[tokio::test]
async fn test_chain_parameter_variants_are_tried_in_order() {
    let mut script = spy_script();
    script.accepted_params = Some(DateRangeParams::StartDateEndDate);
    let (script, connector, _dir) = setup(script);

    let results = connector.fetch_iv_terms(&symbols(&["SPY"]), 120, 0).await;

    assert!(results["SPY"].is_valid());
    let script = lock(&script);
    assert_eq!(
        script.rejected_params[..3],
        [
            DateRangeParams::StartEnd,
            DateRangeParams::BeginTimeEndTime,
            DateRangeParams::StartTimeEndTime,
        ]
    );
    // Three rejections per chain request, eight requests
    assert_eq!(script.rejected_params.len(), 24);
    assert_eq!(script.chain_calls, 32);

    drop(script);
    connector.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mut script = spy_script();
    script.snapshot_failures = 2;
    let (script, connector, _dir) = setup(script);

    let results = connector.fetch_iv_terms(&symbols(&["SPY"]), 120, 2).await;

    assert!(results["SPY"].is_valid());
    assert_eq!(lock(&script).snapshot_calls, 3);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_do_not_stop_the_batch() {
    let mut script = spy_script();
    script.add_expiry("US.QQQ", 10, 0.5, 0.30, 200.0);
    script.snapshot_failures = 3;
    let (script, connector, _dir) = setup(script);

    let results = connector
        .fetch_iv_terms(&symbols(&["SPY", "QQQ"]), 120, 2)
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results["SPY"], IvTermResult::default());
    assert!(approx(results["QQQ"].iv30, 30.0));
    assert_eq!(lock(&script).snapshot_calls, 4);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_snapshots_are_chunked_and_rejected_chunk_is_skipped() {
    let mut script = OptionScript::default();
    script.add_call_ladder("US.SPY", 10, 400, 0.20);
    script.add_call_ladder("US.SPY", 40, 50, 0.35);
    script.rejected_snapshot_calls = vec![2];
    let (script, connector, _dir) = setup(script);

    let results = connector.fetch_iv_terms(&symbols(&["SPY"]), 120, 2).await;
    let spy = results["SPY"];

    // Only the 10-day expiry survives, so every horizon is its IV
    assert!(spy.is_valid());
    assert!(approx(spy.iv7, 20.0));
    assert!(approx(spy.iv30, 20.0));
    assert!(approx(spy.iv90, 20.0));
    assert_eq!(spy.total_oi, Some(4000));

    let script = lock(&script);
    assert_eq!(script.snapshot_batch_sizes, vec![400, 50]);
    assert_eq!(script.snapshot_calls, 2);

    drop(script);
    connector.shutdown().await;
}

#[tokio::test]
async fn test_panicking_attempt_is_retried() {
    let mut script = spy_script();
    script.snapshot_panics = 1;
    let (script, connector, _dir) = setup(script);

    let results = connector.fetch_iv_terms(&symbols(&["SPY"]), 120, 2).await;

    assert!(results["SPY"].is_valid());
    assert!(approx(results["SPY"].iv7, 20.0));
    assert_eq!(lock(&script).snapshot_calls, 2);
    assert!(connector.is_connected().await);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_lost_session_aborts_remaining_symbols() {
    let mut script = spy_script();
    script.lose_session_on_chain = true;
    let (script, connector, _dir) = setup(script);

    let results = connector
        .fetch_iv_terms(&symbols(&["SPY", "QQQ", "IWM"]), 120, 2)
        .await;

    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| *r == IvTermResult::default()));
    assert_eq!(lock(&script).chain_calls, 1);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (script, connector, _dir) = setup(OptionScript::default());
    let settings = radar_broker::ConnectionSettings::options("127.0.0.1", 11111, "US");

    assert!(!connector.is_connected().await);
    assert!(connector.connect(&settings).await);
    assert!(connector.connect(&settings).await);
    assert!(connector.is_connected().await);
    assert_eq!(lock(&script).open_calls, 1);
    assert_eq!(connector.status().state, ConnectionState::Connected);

    connector.disconnect().await;
    assert!(!connector.is_connected().await);
    assert_eq!(connector.status().state, ConnectionState::Disconnected);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_failed_connect_returns_false_and_batch_still_answers() {
    let mut script = spy_script();
    script.refuse_open = true;
    let (script, connector, _dir) = setup(script);
    let settings = radar_broker::ConnectionSettings::options("127.0.0.1", 11111, "US");

    assert!(!connector.connect(&settings).await);
    let status = connector.status();
    assert_eq!(status.state, ConnectionState::Error);
    assert!(status.last_error.is_some());

    let results = connector.fetch_iv_terms(&symbols(&["SPY", "QQQ"]), 120, 2).await;
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|r| !r.is_valid()));
    assert_eq!(lock(&script).chain_calls, 1);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_current_price_from_snapshot() {
    let mut script = OptionScript::default();
    script.add_underlying_price("US.SPY", 512.3);
    let (_script, connector, _dir) = setup(script);

    assert_eq!(connector.get_current_price("SPY").await, None);

    let settings = radar_broker::ConnectionSettings::options("127.0.0.1", 11111, "US");
    assert!(connector.connect(&settings).await);
    assert_eq!(connector.get_current_price("spy").await, Some(512.3));

    connector.shutdown().await;
}

#[tokio::test]
async fn test_batch_delta_oi_uses_cache() {
    let (_script, connector, _dir) = setup(OptionScript::default());
    let yesterday = today() - Duration::days(1);
    connector
        .oi_cache()
        .compute_delta_on(yesterday, "SPY", Some(100_000));

    let readings = HashMap::from([
        ("SPY".to_string(), Some(105_000)),
        ("QQQ".to_string(), Some(40_000)),
        ("IWM".to_string(), None),
    ]);
    let deltas = connector.batch_compute_delta_oi(readings).await;

    assert_eq!(deltas["SPY"], (Some(105_000), Some(5000)));
    assert_eq!(deltas["QQQ"], (Some(40_000), None));
    assert_eq!(deltas["IWM"], (None, None));

    let store = connector.oi_cache().load();
    assert!(store["SPY"].contains_key(&today().format("%Y-%m-%d").to_string()));
    assert!(!store.contains_key("IWM"));
}

#[tokio::test]
async fn test_shutdown_releases_worker() {
    let (_script, connector, _dir) = setup(OptionScript::default());
    let settings = radar_broker::ConnectionSettings::options("127.0.0.1", 11111, "US");
    assert!(connector.connect(&settings).await);

    connector.shutdown().await;

    assert!(!connector.is_connected().await);
}
