//! Connection bookkeeping shared by the vendor connectors.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a vendor connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Where and how to reach a vendor gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    /// Client id (history vendor only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i32>,
    /// Market prefix for symbol codes (options vendor only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    pub timeout_secs: u64,
}

impl ConnectionSettings {
    pub fn history(host: impl Into<String>, port: u16, client_id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: Some(client_id),
            market: None,
            timeout_secs: 30,
        }
    }

    pub fn options(host: impl Into<String>, port: u16, market: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: None,
            market: Some(market.into()),
            timeout_secs: 30,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Point-in-time view of one vendor connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    pub vendor: &'static str,
    pub state: ConnectionState,
    pub connected: bool,
    pub available: bool,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub settings: Option<ConnectionSettings>,
}

impl BrokerStatus {
    /// Status of a vendor that is disabled or has no client.
    pub fn unavailable(vendor: &'static str, reason: impl Into<String>) -> Self {
        Self {
            vendor,
            state: ConnectionState::Disconnected,
            connected: false,
            available: false,
            last_connected: None,
            last_error: Some(reason.into()),
            settings: None,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    state: ConnectionState,
    settings: Option<ConnectionSettings>,
    last_connected: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Tracks the connection lifecycle of one vendor.
#[derive(Debug)]
pub struct SessionTracker {
    vendor: &'static str,
    inner: Mutex<SessionState>,
}

impl SessionTracker {
    pub fn new(vendor: &'static str) -> Self {
        Self {
            vendor,
            inner: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("{} session mutex was poisoned, recovering", self.vendor);
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Settings of the current or most recent connection.
    pub fn settings(&self) -> Option<ConnectionSettings> {
        self.lock().settings.clone()
    }

    pub fn begin_connect(&self, settings: &ConnectionSettings) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Connecting;
        inner.settings = Some(settings.clone());
    }

    pub fn mark_connected(&self) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Connected;
        inner.last_connected = Some(Utc::now());
        inner.last_error = None;
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Error;
        inner.last_error = Some(error.into());
    }

    pub fn mark_disconnected(&self) {
        self.lock().state = ConnectionState::Disconnected;
    }

    pub fn snapshot(&self) -> BrokerStatus {
        let inner = self.lock();
        BrokerStatus {
            vendor: self.vendor,
            state: inner.state,
            connected: inner.state == ConnectionState::Connected,
            available: true,
            last_connected: inner.last_connected,
            last_error: inner.last_error.clone(),
            settings: inner.settings.clone(),
        }
    }
}
