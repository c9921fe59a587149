//! History client over the IBKR Client Portal gateway REST API.
//!
//! Endpoints used:
//! - `GET /iserver/auth/status` to check the gateway session
//! - `GET /iserver/secdef/search` to resolve contract ids
//! - `GET /iserver/marketdata/history` for daily bars
//! - `GET /iserver/marketdata/snapshot` for last and prior close
//! - `POST /logout` to end the session
//!
//! The gateway address comes from the connection settings (`https://{host}:{port}/v1/api`)
//! unless a fixed URL is configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::VendorError;
use crate::session::ConnectionSettings;

use super::client::HistoricalDataApi;
use super::models::{
    Bar, BarRequest, Contract, DurationUnit, MarketDataType, PriceSnapshot, SecurityKind,
};

/// Port the Client Portal gateway listens on by default.
pub const DEFAULT_GATEWAY_PORT: u16 = 5000;

/// Snapshot fields: last price and prior close.
const SNAPSHOT_FIELDS: &str = "31,7741";
const LAST_PRICE_FIELD: &str = "31";
const PRIOR_CLOSE_FIELD: &str = "7741";

/// The first snapshot request for a contract only subscribes it; fields arrive on a
/// later request.
const SNAPSHOT_ATTEMPTS: usize = 3;
const SNAPSHOT_PAUSE: Duration = Duration::from_secs(1);

/// Gateway base URL for a host and port.
pub fn gateway_url(host: &str, port: u16) -> String {
    format!("https://{}:{}/v1/api", host, port)
}

#[derive(Debug, Deserialize)]
struct AuthStatusResponse {
    #[serde(default)]
    authenticated: bool,
    #[serde(default)]
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct SecdefEntry {
    conid: Value,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Vec<HistoryBar>,
}

#[derive(Debug, Deserialize)]
struct HistoryBar {
    /// Bar start, epoch milliseconds
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

/// Client Portal gateway client.
///
/// The gateway runs locally with a self-signed certificate, so certificate
/// validation is disabled for it.
pub struct ClientPortalClient {
    base_url: String,
    /// Set when the gateway URL is configured explicitly; connect settings are ignored then.
    fixed_url: bool,
    http: Client,
    connected: bool,
    market_data_type: MarketDataType,
}

impl ClientPortalClient {
    /// Client whose gateway address is taken from the settings passed to `connect`.
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: gateway_url("127.0.0.1", DEFAULT_GATEWAY_PORT),
            fixed_url: false,
            http,
            connected: false,
            market_data_type: MarketDataType::Delayed,
        }
    }

    /// Pins the gateway URL regardless of connect settings.
    pub fn with_gateway_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self.fixed_url = true;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Points the client at the gateway named by `settings`, unless the URL is pinned.
    fn target(&mut self, settings: &ConnectionSettings) {
        if !self.fixed_url {
            self.base_url = gateway_url(&settings.host, settings.port);
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<String, VendorError> {
        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(VendorError::NotConnected);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VendorError::Rejected {
                code: i32::from(status.as_u16()),
                message: body,
            });
        }

        response
            .text()
            .await
            .map_err(|e| VendorError::Transport(format!("Failed to read response: {}", e)))
    }
}

fn map_send_error(error: reqwest::Error, timeout: Duration) -> VendorError {
    if error.is_timeout() {
        VendorError::Timeout(timeout)
    } else {
        VendorError::Transport(error.to_string())
    }
}

/// Client Portal `period` parameter for a duration, e.g. `80d` or `1y`.
pub(crate) fn period_param(request: &BarRequest) -> Result<String, VendorError> {
    let unit = match request.duration.unit {
        DurationUnit::Days => "d",
        DurationUnit::Weeks => "w",
        DurationUnit::Months => "m",
        DurationUnit::Years => "y",
        DurationUnit::Seconds => {
            return Err(VendorError::UnsupportedParameters(format!(
                "duration '{}' is below daily resolution",
                request.duration
            )))
        }
    };
    Ok(format!("{}{}", request.duration.amount, unit))
}

/// First contract id in a secdef search response.
pub(crate) fn parse_conid(body: &str, symbol: &str) -> Result<i64, VendorError> {
    let entries: Vec<SecdefEntry> = serde_json::from_str(body)
        .map_err(|e| VendorError::Malformed(format!("secdef search: {}", e)))?;

    let entry = entries
        .iter()
        .find(|entry| {
            entry
                .symbol
                .as_deref()
                .map_or(true, |s| s.eq_ignore_ascii_case(symbol))
        })
        .ok_or_else(|| VendorError::Rejected {
            code: 404,
            message: format!("No contract found for {}", symbol),
        })?;

    let conid = match &entry.conid {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    conid.ok_or_else(|| VendorError::Malformed(format!("bad conid for {}: {}", symbol, entry.conid)))
}

/// Snapshot field value: a number, or a string with an optional status prefix
/// (`"C512.30"` for a prior close, `"H"` for halted).
fn snapshot_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Last and prior close for `con_id` from a snapshot response.
///
/// `None` when the gateway has not delivered any price field yet.
pub(crate) fn parse_price_snapshot(
    body: &str,
    con_id: i64,
) -> Result<Option<PriceSnapshot>, VendorError> {
    let rows: Vec<serde_json::Map<String, Value>> = serde_json::from_str(body)
        .map_err(|e| VendorError::Malformed(format!("snapshot: {}", e)))?;

    let row = rows.iter().find(|row| {
        row.get("conid")
            .and_then(|conid| match conid {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .map_or(true, |conid| conid == con_id)
    });
    let Some(row) = row else {
        return Ok(None);
    };

    let snapshot = PriceSnapshot {
        last: row.get(LAST_PRICE_FIELD).and_then(snapshot_number),
        close: row.get(PRIOR_CLOSE_FIELD).and_then(snapshot_number),
    };
    Ok((snapshot.last.is_some() || snapshot.close.is_some()).then_some(snapshot))
}

/// Daily bars from a history response, oldest first.
pub(crate) fn parse_bars(body: &str) -> Result<Vec<Bar>, VendorError> {
    let response: HistoryResponse = serde_json::from_str(body)
        .map_err(|e| VendorError::Malformed(format!("history: {}", e)))?;

    let mut bars: Vec<Bar> = response
        .data
        .iter()
        .filter_map(|bar| {
            let date = Utc.timestamp_millis_opt(bar.t).single()?.date_naive();
            Some(Bar {
                date,
                open: bar.o,
                high: bar.h,
                low: bar.l,
                close: bar.c,
                volume: bar.v,
            })
        })
        .collect();
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

#[async_trait(?Send)]
impl HistoricalDataApi for ClientPortalClient {
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), VendorError> {
        self.target(settings);
        let timeout = Duration::from_secs(settings.timeout_secs);
        let request = self.http.get(self.url("/iserver/auth/status")).timeout(timeout);
        let body = self.send(request, timeout).await?;

        let status: AuthStatusResponse = serde_json::from_str(&body)
            .map_err(|e| VendorError::Malformed(format!("auth status: {}", e)))?;
        if !status.authenticated {
            warn!(
                "Client Portal gateway at {} is not authenticated (connected={})",
                self.base_url, status.connected
            );
            return Err(VendorError::NotConnected);
        }

        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        let timeout = Duration::from_secs(10);
        let request = self.http.post(self.url("/logout")).timeout(timeout);
        if let Err(e) = self.send(request, timeout).await {
            warn!("Client Portal logout failed: {}", e);
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn set_market_data_type(&mut self, kind: MarketDataType) -> Result<(), VendorError> {
        // The gateway picks the feed from account subscriptions
        debug!("Client Portal market data type set to {:?}", kind);
        self.market_data_type = kind;
        Ok(())
    }

    async fn qualify_contract(&mut self, contract: &Contract) -> Result<Contract, VendorError> {
        if contract.con_id.is_some() {
            return Ok(contract.clone());
        }
        let sec_type = match contract.kind {
            SecurityKind::Stock => "STK",
            SecurityKind::Index => "IND",
        };
        let timeout = Duration::from_secs(30);
        let request = self
            .http
            .get(self.url("/iserver/secdef/search"))
            .query(&[("symbol", contract.symbol.as_str()), ("secType", sec_type)])
            .timeout(timeout);
        let body = self.send(request, timeout).await?;

        let mut qualified = contract.clone();
        qualified.con_id = Some(parse_conid(&body, &contract.symbol)?);
        Ok(qualified)
    }

    async fn historical_bars(
        &mut self,
        contract: &Contract,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, VendorError> {
        if !self.connected {
            return Err(VendorError::NotConnected);
        }
        let con_id = contract.con_id.ok_or_else(|| {
            VendorError::UnsupportedParameters(format!("{} is not qualified", contract.symbol))
        })?;
        let period = period_param(request)?;
        let outside_rth = if request.use_rth { "false" } else { "true" };
        debug!(
            "Client Portal history conid={} period={} feed={:?}",
            con_id, period, self.market_data_type
        );

        let http_request = self
            .http
            .get(self.url("/iserver/marketdata/history"))
            .query(&[
                ("conid", con_id.to_string().as_str()),
                ("period", period.as_str()),
                ("bar", "1d"),
                ("outsideRth", outside_rth),
            ])
            .timeout(request.timeout);
        let body = self.send(http_request, request.timeout).await?;
        parse_bars(&body)
    }

    async fn price_snapshot(&mut self, contract: &Contract) -> Result<PriceSnapshot, VendorError> {
        if !self.connected {
            return Err(VendorError::NotConnected);
        }
        let con_id = contract.con_id.ok_or_else(|| {
            VendorError::UnsupportedParameters(format!("{} is not qualified", contract.symbol))
        })?;
        let timeout = Duration::from_secs(30);

        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            let request = self
                .http
                .get(self.url("/iserver/marketdata/snapshot"))
                .query(&[
                    ("conids", con_id.to_string().as_str()),
                    ("fields", SNAPSHOT_FIELDS),
                ])
                .timeout(timeout);
            let body = self.send(request, timeout).await?;
            if let Some(snapshot) = parse_price_snapshot(&body, con_id)? {
                return Ok(snapshot);
            }
            debug!(
                "Client Portal snapshot conid={} attempt {}/{} has no fields yet",
                con_id, attempt, SNAPSHOT_ATTEMPTS
            );
            if attempt < SNAPSHOT_ATTEMPTS {
                tokio::time::sleep(SNAPSHOT_PAUSE).await;
            }
        }
        Ok(PriceSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::models::HistoryDuration;
    use chrono::NaiveDate;

    #[test]
    fn test_period_param() {
        let request = BarRequest::trades(HistoryDuration::RELATIVE_MOMENTUM);
        assert_eq!(period_param(&request).unwrap(), "80d");

        let request = BarRequest::trades(HistoryDuration::ONE_YEAR);
        assert_eq!(period_param(&request).unwrap(), "1y");

        let request = BarRequest::trades(HistoryDuration::new(30, DurationUnit::Seconds));
        assert!(matches!(
            period_param(&request),
            Err(VendorError::UnsupportedParameters(_))
        ));
    }

    #[test]
    fn test_parse_conid_accepts_string_and_number() {
        let body = r#"[{"conid": "756733", "symbol": "SPY"}]"#;
        assert_eq!(parse_conid(body, "SPY").unwrap(), 756733);

        let body = r#"[{"conid": 13455763, "symbol": "VIX"}]"#;
        assert_eq!(parse_conid(body, "vix").unwrap(), 13455763);
    }

    #[test]
    fn test_parse_conid_no_match() {
        let body = r#"[{"conid": "1", "symbol": "SPYG"}]"#;
        assert!(matches!(
            parse_conid(body, "SPY"),
            Err(VendorError::Rejected { code: 404, .. })
        ));
        assert!(matches!(
            parse_conid("{}", "SPY"),
            Err(VendorError::Malformed(_))
        ));
    }

    #[test]
    fn test_gateway_url_follows_connect_settings_unless_pinned() {
        let settings = ConnectionSettings::history("10.0.0.5", 5001, 3);

        let mut client = ClientPortalClient::new(Duration::from_secs(5));
        client.target(&settings);
        assert_eq!(client.base_url(), "https://10.0.0.5:5001/v1/api");

        let mut pinned = ClientPortalClient::new(Duration::from_secs(5))
            .with_gateway_url("https://gateway.local/v1/api/");
        pinned.target(&settings);
        assert_eq!(pinned.base_url(), "https://gateway.local/v1/api");
    }

    #[test]
    fn test_parse_price_snapshot() {
        let body = r#"[{"conid": 756733, "31": "512.30", "7741": "C510.10"}]"#;
        let snapshot = parse_price_snapshot(body, 756733).unwrap().unwrap();
        assert_eq!(snapshot.last, Some(512.3));
        assert_eq!(snapshot.close, Some(510.1));

        // Halted: no last trade, prior close only
        let body = r#"[{"conid": "756733", "31": "H", "7741": "1,024.5"}]"#;
        let snapshot = parse_price_snapshot(body, 756733).unwrap().unwrap();
        assert_eq!(snapshot.last, None);
        assert_eq!(snapshot.price(), Some(1024.5));
    }

    #[test]
    fn test_parse_price_snapshot_before_fields_arrive() {
        let body = r#"[{"conid": 756733, "conidEx": "756733"}]"#;
        assert_eq!(parse_price_snapshot(body, 756733).unwrap(), None);
        assert_eq!(parse_price_snapshot("[]", 756733).unwrap(), None);
        assert!(matches!(
            parse_price_snapshot("{}", 756733),
            Err(VendorError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_bars_sorted_by_date() {
        // 2024-01-03 and 2024-01-02 at 14:30 UTC
        let body = r#"{"data": [
            {"t": 1704292200000, "o": 471.0, "h": 473.0, "l": 470.0, "c": 472.5, "v": 1000},
            {"t": 1704205800000, "o": 470.0, "h": 472.0, "l": 468.0, "c": 471.0, "v": 900}
        ]}"#;
        let bars = parse_bars(body).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 472.5);
    }

    #[test]
    fn test_parse_bars_empty_and_malformed() {
        assert!(parse_bars(r#"{"data": []}"#).unwrap().is_empty());
        assert!(parse_bars(r#"{}"#).unwrap().is_empty());
        assert!(matches!(parse_bars("nope"), Err(VendorError::Malformed(_))));
    }
}
