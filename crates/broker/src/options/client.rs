//! Options vendor client seam.
//!
//! The options vendor speaks a proprietary gateway protocol through a client
//! library that is not thread-safe. The connector never touches the client
//! directly: it lives on the options worker thread and is reached through
//! [`OptionQuoteApi`].

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::VendorError;
use crate::session::ConnectionSettings;

use super::models::OptionType;
use super::records::VendorRecord;

/// Names a client version uses for the chain date bounds.
///
/// Client releases renamed these parameters several times. Variants are tried in
/// [`DateRangeParams::ORDERED`] order until one is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DateRangeParams {
    StartEnd,
    BeginTimeEndTime,
    StartTimeEndTime,
    StartDateEndDate,
}

impl DateRangeParams {
    pub const ORDERED: [DateRangeParams; 4] = [
        DateRangeParams::StartEnd,
        DateRangeParams::BeginTimeEndTime,
        DateRangeParams::StartTimeEndTime,
        DateRangeParams::StartDateEndDate,
    ];

    /// Parameter names for the lower and upper bound.
    pub fn names(&self) -> (&'static str, &'static str) {
        match self {
            Self::StartEnd => ("start", "end"),
            Self::BeginTimeEndTime => ("begin_time", "end_time"),
            Self::StartTimeEndTime => ("start_time", "end_time"),
            Self::StartDateEndDate => ("start_date", "end_date"),
        }
    }
}

/// Inclusive expiration-date bounds for a chain request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainRange {
    pub params: DateRangeParams,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ChainRange {
    /// The bounds formatted `YYYY-MM-DD`, keyed by this variant's parameter names.
    pub fn as_params(&self) -> [(&'static str, String); 2] {
        let (start_name, end_name) = self.params.names();
        [
            (start_name, self.start.format("%Y-%m-%d").to_string()),
            (end_name, self.end.format("%Y-%m-%d").to_string()),
        ]
    }
}

/// One option chain request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainQuery {
    pub option_type: OptionType,
    /// `None` asks for the vendor's default range.
    pub range: Option<ChainRange>,
}

impl ChainQuery {
    pub fn bounded(
        option_type: OptionType,
        params: DateRangeParams,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            option_type,
            range: Some(ChainRange { params, start, end }),
        }
    }

    pub fn unbounded(option_type: OptionType) -> Self {
        Self {
            option_type,
            range: None,
        }
    }
}

/// Operations the connector needs from an options vendor client.
///
/// Implementations translate native failures into [`VendorError`]: a rejected
/// parameter set must surface as [`VendorError::UnsupportedParameters`] so the
/// next naming variant is tried, and a lost gateway session as
/// [`VendorError::NotConnected`].
#[async_trait(?Send)]
pub trait OptionQuoteApi {
    /// Opens the quote session.
    async fn open(&mut self, settings: &ConnectionSettings) -> Result<(), VendorError>;

    /// Closes the quote session. Closing a closed session is a no-op.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Option chain rows for an underlying code such as `US.AAPL`.
    async fn option_chain(
        &mut self,
        code: &str,
        query: &ChainQuery,
    ) -> Result<Vec<VendorRecord>, VendorError>;

    /// Market snapshot rows for up to 400 codes.
    async fn market_snapshot(&mut self, codes: &[String]) -> Result<Vec<VendorRecord>, VendorError>;
}

#[async_trait(?Send)]
impl<T: OptionQuoteApi + ?Sized> OptionQuoteApi for Box<T> {
    async fn open(&mut self, settings: &ConnectionSettings) -> Result<(), VendorError> {
        (**self).open(settings).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn option_chain(
        &mut self,
        code: &str,
        query: &ChainQuery,
    ) -> Result<Vec<VendorRecord>, VendorError> {
        (**self).option_chain(code, query).await
    }

    async fn market_snapshot(&mut self, codes: &[String]) -> Result<Vec<VendorRecord>, VendorError> {
        (**self).market_snapshot(codes).await
    }
}

/// Boxed options client as held by the worker.
pub type BoxedOptionClient = Box<dyn OptionQuoteApi>;

/// Builds the options client. Runs once, on the options worker thread.
pub type OptionClientFactory = Box<dyn FnOnce() -> BoxedOptionClient + Send>;
