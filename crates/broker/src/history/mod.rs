//! History vendor: daily bars, VIX and relative momentum against a benchmark.

pub mod analytics;
pub mod client;
pub mod client_portal;
mod connector;
mod models;

pub use analytics::{
    BenchmarkTrend, FiftyTwoWeekRange, MomentumStrength, RelativeMomentum, SmaReading,
};
pub use client::{BoxedHistoryClient, HistoricalDataApi, HistoryClientFactory};
pub use client_portal::{gateway_url, ClientPortalClient, DEFAULT_GATEWAY_PORT};
pub use connector::{HistoryVendorConnector, HISTORY_VENDOR};
pub use models::{
    Bar, BarRequest, ClosePoint, Contract, DurationUnit, HistoryDuration, MarketDataType,
    PriceSnapshot, SecurityKind,
};
