//! Explicitly constructed owner of both vendor connectors and the OI cache.

use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::config::BrokerConfig;
use crate::factory::{
    create_history_connector, create_options_connector, HistoryConnector, OptionsConnector,
};
use crate::history::HistoryClientFactory;
use crate::open_interest::OiDeltaCache;
use crate::options::OptionClientFactory;
use crate::session::BrokerStatus;

/// Status of both vendors.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BrokerContextStatus {
    pub history: BrokerStatus,
    pub options: BrokerStatus,
}

/// Builds a [`BrokerContext`], optionally with injected vendor clients.
pub struct BrokerContextBuilder {
    config: BrokerConfig,
    history_client: Option<HistoryClientFactory>,
    options_client: Option<OptionClientFactory>,
}

impl BrokerContextBuilder {
    pub fn history_client(mut self, factory: HistoryClientFactory) -> Self {
        self.history_client = Some(factory);
        self
    }

    pub fn options_client(mut self, factory: OptionClientFactory) -> Self {
        self.options_client = Some(factory);
        self
    }

    pub fn build(self) -> BrokerContext {
        let oi_cache = Arc::new(OiDeltaCache::new(self.config.oi_cache_path.clone()));
        let history = create_history_connector(&self.config.history, self.history_client);
        let options =
            create_options_connector(&self.config.options, oi_cache.clone(), self.options_client);

        BrokerContext {
            config: self.config,
            history,
            options,
            oi_cache,
        }
    }
}

/// Both vendor connectors, shared by reference or `Arc` with whoever needs them.
pub struct BrokerContext {
    config: BrokerConfig,
    history: Arc<dyn HistoryConnector>,
    options: Arc<dyn OptionsConnector>,
    oi_cache: Arc<OiDeltaCache>,
}

impl BrokerContext {
    /// Context with the built-in clients only.
    pub fn new(config: BrokerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: BrokerConfig) -> BrokerContextBuilder {
        BrokerContextBuilder {
            config,
            history_client: None,
            options_client: None,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn history(&self) -> Arc<dyn HistoryConnector> {
        self.history.clone()
    }

    pub fn options(&self) -> Arc<dyn OptionsConnector> {
        self.options.clone()
    }

    pub fn oi_cache(&self) -> Arc<OiDeltaCache> {
        self.oi_cache.clone()
    }

    /// Connects both vendors with their configured settings.
    ///
    /// Returns `(history_connected, options_connected)`.
    pub async fn connect_all(&self) -> (bool, bool) {
        let history_settings = self.config.history.settings();
        let options_settings = self.config.options.settings();
        let (history, options) = tokio::join!(
            self.history.connect(&history_settings),
            self.options.connect(&options_settings)
        );
        info!(
            "Broker connections: {}={} {}={}",
            self.history.vendor(),
            history,
            self.options.vendor(),
            options
        );
        (history, options)
    }

    pub fn status(&self) -> BrokerContextStatus {
        BrokerContextStatus {
            history: self.history.status(),
            options: self.options.status(),
        }
    }

    /// Disconnects both vendors and stops their worker threads.
    pub async fn shutdown(self) {
        tokio::join!(self.history.shutdown(), self.options.shutdown());
        info!("Broker context shut down");
    }
}
