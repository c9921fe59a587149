//! Momentum Radar Broker Crate
//!
//! This crate connects the radar to its two market data vendors and derives the
//! option metrics the scanner ranks on.
//!
//! # Overview
//!
//! The broker crate supports:
//! - Daily bars, VIX and sector-vs-benchmark relative momentum from the history vendor
//! - Option chains and snapshots from the options vendor, reduced to an ATM implied
//!   volatility term structure (IV7/IV30/IV60/IV90)
//! - One-day open-interest deltas from a day-keyed file cache
//! - Per-endpoint sliding-window rate limiting and bounded retries
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  BrokerContext   |  (built from BrokerConfig, explicit shutdown)
//! +------------------+
//!          |
//!          v
//! +------------------+     +----------------------+
//! | HistoryConnector | ... |   OptionsConnector   |  (real or unavailable)
//! +------------------+     +----------------------+
//!          |                          |
//!          v                          v
//! +------------------+     +----------------------+
//! |   ClientWorker   |     |     ClientWorker     |  (one OS thread per vendor)
//! +------------------+     +----------------------+
//!          |                          |
//!          v                          v
//! +------------------+     +----------------------+
//! | HistoricalDataApi|     |    OptionQuoteApi    |  (vendor client)
//! +------------------+     +----------------------+
//! ```
//!
//! Vendor client libraries are not thread-safe and keep per-thread state. Each
//! client is created on, and only ever touched from, its worker thread.
//!
//! # Core Types
//!
//! - [`BrokerContext`] - Owner of both connectors and the OI cache
//! - [`IvTermResult`] - ATM IV at 7/30/60/90 days plus total open interest
//! - [`RelativeMomentum`] - Sector relative strength against a benchmark
//! - [`BrokerError`] - Connector error with retry classification

pub mod config;
pub mod context;
pub mod errors;
pub mod factory;
pub mod history;
pub mod metrics;
pub mod open_interest;
pub mod options;
pub mod rate_limiter;
pub mod retry;
pub mod session;
pub mod worker;

pub use config::{BrokerConfig, HistoryConfig, OptionsConfig};
pub use context::{BrokerContext, BrokerContextBuilder, BrokerContextStatus};
pub use errors::{BrokerError, RetryClass, VendorError};
pub use factory::{
    create_history_connector, create_options_connector, HistoryConnector, OptionsConnector,
    UnavailableHistoryConnector, UnavailableOptionsConnector, DEFAULT_MAX_DAYS,
    DEFAULT_MAX_RETRIES,
};
pub use history::{
    Bar, ClosePoint, HistoryDuration, HistoryVendorConnector, MomentumStrength, RelativeMomentum,
};
pub use metrics::{EmptyReason, FetchMetrics, FetchStatus};
pub use open_interest::{OiDelta, OiDeltaCache};
pub use options::{IvTermResult, OptionsVendorConnector};
pub use rate_limiter::{RateLimit, SlidingWindowLimiter};
pub use retry::RetryPolicy;
pub use session::{BrokerStatus, ConnectionSettings, ConnectionState};
pub use worker::{ClientWorker, WorkerContext};
