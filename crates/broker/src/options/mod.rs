//! Options vendor: option chains, snapshots and the derived IV term structure.

pub mod atm;
pub mod client;
mod connector;
pub mod expirations;
pub mod interpolation;
mod models;
pub mod pipeline;
pub mod records;
pub mod snapshots;

pub use client::{
    BoxedOptionClient, ChainQuery, ChainRange, DateRangeParams, OptionClientFactory,
    OptionQuoteApi,
};
pub use connector::{OptionsVendorConnector, OPTIONS_VENDOR};
pub use models::{DtePoint, Expirations, IvTermResult, OptionContract, OptionType, SnapshotRecord};
pub use pipeline::{estimate_iv_fetch_time, format_code, OptionLimiters};
pub use records::VendorRecord;
