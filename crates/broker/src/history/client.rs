//! History vendor client seam.

use async_trait::async_trait;

use crate::errors::VendorError;
use crate::session::ConnectionSettings;

use super::models::{Bar, BarRequest, Contract, MarketDataType, PriceSnapshot};

/// Operations the connector needs from a history vendor client.
///
/// The client is owned by the history worker thread, so its futures need not be
/// `Send`.
#[async_trait(?Send)]
pub trait HistoricalDataApi {
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), VendorError>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Selects the feed used for subsequent requests.
    async fn set_market_data_type(&mut self, kind: MarketDataType) -> Result<(), VendorError>;

    /// Resolves the vendor contract id.
    async fn qualify_contract(&mut self, contract: &Contract) -> Result<Contract, VendorError>;

    /// Daily bars ending today, oldest first.
    async fn historical_bars(
        &mut self,
        contract: &Contract,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, VendorError>;

    /// Last trade and prior close of a qualified contract.
    async fn price_snapshot(&mut self, contract: &Contract) -> Result<PriceSnapshot, VendorError>;
}

#[async_trait(?Send)]
impl<T: HistoricalDataApi + ?Sized> HistoricalDataApi for Box<T> {
    async fn connect(&mut self, settings: &ConnectionSettings) -> Result<(), VendorError> {
        (**self).connect(settings).await
    }

    async fn disconnect(&mut self) {
        (**self).disconnect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn set_market_data_type(&mut self, kind: MarketDataType) -> Result<(), VendorError> {
        (**self).set_market_data_type(kind).await
    }

    async fn qualify_contract(&mut self, contract: &Contract) -> Result<Contract, VendorError> {
        (**self).qualify_contract(contract).await
    }

    async fn historical_bars(
        &mut self,
        contract: &Contract,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, VendorError> {
        (**self).historical_bars(contract, request).await
    }

    async fn price_snapshot(&mut self, contract: &Contract) -> Result<PriceSnapshot, VendorError> {
        (**self).price_snapshot(contract).await
    }
}

pub type BoxedHistoryClient = Box<dyn HistoricalDataApi>;

/// Builds the history client. Runs once, on the history worker thread.
pub type HistoryClientFactory = Box<dyn FnOnce() -> BoxedHistoryClient + Send>;
