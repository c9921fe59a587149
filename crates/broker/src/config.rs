//! Environment-driven configuration for both vendors and the OI cache.

use std::path::PathBuf;
use std::str::FromStr;

use log::warn;
use serde::Serialize;

use crate::history::DEFAULT_GATEWAY_PORT;
use crate::rate_limiter::RateLimit;
use crate::session::ConnectionSettings;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Gateway host and port; the built-in client derives its URL from them.
    pub host: String,
    pub port: u16,
    /// Session client id, passed to injected socket clients through the settings.
    pub client_id: i32,
    pub timeout_secs: u64,
    /// Fixed gateway URL overriding host and port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            client_id: 3,
            timeout_secs: 30,
            gateway_url: None,
        }
    }
}

impl HistoryConfig {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::history(self.host.clone(), self.port, self.client_id)
            .with_timeout_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub market: String,
    pub chain_limit: RateLimit,
    pub snapshot_limit: RateLimit,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 11111,
            market: "US".to_string(),
            chain_limit: RateLimit::option_chain(),
            snapshot_limit: RateLimit::market_snapshot(),
        }
    }
}

impl OptionsConfig {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::options(self.host.clone(), self.port, self.market.clone())
    }
}

/// Broker layer configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub history: HistoryConfig,
    pub options: OptionsConfig,
    pub oi_cache_path: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            options: OptionsConfig::default(),
            oi_cache_path: PathBuf::from("oi_cache.json"),
        }
    }
}

impl BrokerConfig {
    /// Reads the process environment. Unset or invalid values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        let history = HistoryConfig {
            enabled: vars.flag("RADAR_HISTORY_ENABLED", defaults.history.enabled),
            host: vars.string("IBKR_HOST", defaults.history.host),
            port: vars.parsed("IBKR_PORT", defaults.history.port),
            client_id: vars.parsed("IBKR_CLIENT_ID", defaults.history.client_id),
            timeout_secs: vars.parsed("IBKR_TIMEOUT_SECS", defaults.history.timeout_secs),
            gateway_url: vars.value("IBKR_GATEWAY_URL").or(defaults.history.gateway_url),
        };
        let options = OptionsConfig {
            enabled: vars.flag("RADAR_OPTIONS_ENABLED", defaults.options.enabled),
            host: vars.string("FUTU_HOST", defaults.options.host),
            port: vars.parsed("FUTU_PORT", defaults.options.port),
            market: vars.string("FUTU_MARKET", defaults.options.market).to_uppercase(),
            chain_limit: vars.parsed("RADAR_CHAIN_LIMIT", defaults.options.chain_limit),
            snapshot_limit: vars.parsed("RADAR_SNAPSHOT_LIMIT", defaults.options.snapshot_limit),
        };
        let oi_cache_path = vars
            .value("RADAR_OI_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.oi_cache_path);

        Self {
            history,
            options,
            oi_cache_path,
        }
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn value(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.value(key).unwrap_or(default)
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.value(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid {}={:?}, using default", key, raw);
                default
            }),
            None => default,
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.value(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(v) => {
                warn!("Invalid {}={:?}, using default", key, v);
                default
            }
            None => default,
        }
    }
}
