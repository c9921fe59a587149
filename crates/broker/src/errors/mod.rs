//! Error types and retry classification for the broker layer.
//!
//! This module provides:
//! - [`VendorError`]: failures reported by a vendor client library
//! - [`BrokerError`]: the main error enum for connector operations
//! - [`RetryClass`]: classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a vendor client.
///
/// Vendor clients translate their native failures (return codes, transport
/// errors, HTTP statuses) into these variants so the connector can classify them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VendorError {
    /// The client rejected the shape of the request (unknown parameter names,
    /// unsupported duration unit). The same request will never succeed.
    #[error("Unsupported parameters: {0}")]
    UnsupportedParameters(String),

    /// The client has no live session with the vendor gateway.
    #[error("Not connected")]
    NotConnected,

    /// The vendor answered with an error code.
    #[error("Rejected ({code}): {message}")]
    Rejected {
        /// Vendor return code or HTTP status
        code: i32,
        /// Vendor error message
        message: String,
    },

    /// The request did not complete within the client timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The transport to the vendor gateway failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The vendor answered with a payload the client could not decode.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The client cannot run on the execution context it was given.
    #[error("Incompatible runtime: {0}")]
    IncompatibleRuntime(String),
}

impl VendorError {
    /// Returns the retry classification for this error.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::UnsupportedParameters(_) | Self::IncompatibleRuntime(_) => RetryClass::Never,
            Self::NotConnected => RetryClass::AbortBatch,
            Self::Rejected { .. } | Self::Timeout(_) | Self::Transport(_) | Self::Malformed(_) => {
                RetryClass::WithBackoff
            }
        }
    }

    /// Whether the vendor answered (as opposed to the request never completing).
    ///
    /// Answered failures of one batch chunk are logged and skipped; transport
    /// failures propagate so the whole symbol can be retried.
    pub fn is_vendor_answer(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Malformed(_))
    }
}

/// Errors that can occur during broker connector operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The vendor session is not established.
    #[error("{vendor} is not connected")]
    NotConnected {
        /// Vendor whose session is missing
        vendor: &'static str,
    },

    /// The worker thread owning the vendor client has stopped or never started.
    #[error("{vendor} worker is unavailable")]
    WorkerUnavailable {
        /// Vendor whose worker is gone
        vendor: &'static str,
    },

    /// A job panicked on the worker thread before producing a result.
    #[error("{vendor} worker job aborted")]
    JobAborted {
        /// Vendor whose job panicked
        vendor: &'static str,
    },

    /// The vendor client was borrowed while another vendor call was still running.
    #[error("{vendor} client is already in use by another call")]
    ClientBusy {
        /// Vendor whose client was busy
        vendor: &'static str,
    },

    /// A blocking entry point was used where it would stall an async scheduler,
    /// or the worker could not build its own runtime.
    #[error("Incompatible runtime: {0}")]
    IncompatibleRuntime(String),

    /// A vendor call failed.
    #[error("{vendor} {operation} failed: {source}")]
    Vendor {
        /// Vendor that failed
        vendor: &'static str,
        /// Operation name, e.g. "option_chain"
        operation: &'static str,
        /// Underlying vendor error
        #[source]
        source: VendorError,
    },

    /// A history duration string could not be parsed.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Reading or writing the open-interest cache file failed.
    #[error("Cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    /// The open-interest cache file could not be encoded.
    #[error("Cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

impl BrokerError {
    /// Wraps a vendor error with the vendor and operation that produced it.
    pub fn vendor(vendor: &'static str, operation: &'static str, source: VendorError) -> Self {
        Self::Vendor {
            vendor,
            operation,
            source,
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use radar_broker::errors::{BrokerError, RetryClass, VendorError};
    ///
    /// let error = BrokerError::vendor("futu", "market_snapshot", VendorError::Transport("reset".into()));
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = BrokerError::NotConnected { vendor: "futu" };
    /// assert_eq!(error.retry_class(), RetryClass::AbortBatch);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Vendor { source, .. } => source.retry_class(),

            // The session or the worker is gone - nothing else in the batch can succeed
            Self::NotConnected { .. } | Self::WorkerUnavailable { .. } => RetryClass::AbortBatch,

            // A panicking job or an overlapping borrow is a bug, not a transient state
            Self::JobAborted { .. }
            | Self::ClientBusy { .. }
            | Self::IncompatibleRuntime(_)
            | Self::InvalidDuration(_)
            | Self::CacheIo(_)
            | Self::CacheFormat(_) => RetryClass::Never,
        }
    }

    /// Whether this error signals the event-loop/runtime incompatibility case.
    pub fn is_incompatible_runtime(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleRuntime(_)
                | Self::Vendor {
                    source: VendorError::IncompatibleRuntime(_),
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_retry_with_backoff() {
        let error = VendorError::Transport("connection reset".to_string());
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);

        let error = VendorError::Timeout(Duration::from_secs(120));
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    }

    #[test]
    fn test_unsupported_parameters_never_retries() {
        let error = VendorError::UnsupportedParameters("begin_time".to_string());
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_lost_session_aborts_batch() {
        let error = BrokerError::vendor("futu", "option_chain", VendorError::NotConnected);
        assert_eq!(error.retry_class(), RetryClass::AbortBatch);

        let error = BrokerError::WorkerUnavailable { vendor: "ibkr" };
        assert_eq!(error.retry_class(), RetryClass::AbortBatch);
    }

    #[test]
    fn test_local_failures_classify_as_never() {
        let error = BrokerError::ClientBusy { vendor: "ibkr" };
        assert_eq!(error.retry_class(), RetryClass::Never);

        let error = BrokerError::InvalidDuration("abc".to_string());
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_vendor_answer_detection() {
        assert!(VendorError::Rejected {
            code: -1,
            message: "quota".to_string()
        }
        .is_vendor_answer());
        assert!(VendorError::Malformed("no code column".to_string()).is_vendor_answer());
        assert!(!VendorError::Transport("eof".to_string()).is_vendor_answer());
    }

    #[test]
    fn test_incompatible_runtime_detection() {
        let error = BrokerError::IncompatibleRuntime("nested".to_string());
        assert!(error.is_incompatible_runtime());

        let error = BrokerError::vendor(
            "ibkr",
            "connect",
            VendorError::IncompatibleRuntime("loop".to_string()),
        );
        assert!(error.is_incompatible_runtime());

        let error = BrokerError::NotConnected { vendor: "ibkr" };
        assert!(!error.is_incompatible_runtime());
    }

    #[test]
    fn test_error_display() {
        let error = BrokerError::vendor(
            "futu",
            "market_snapshot",
            VendorError::Rejected {
                code: -1,
                message: "too many codes".to_string(),
            },
        );
        assert_eq!(
            format!("{}", error),
            "futu market_snapshot failed: Rejected (-1): too many codes"
        );

        let error = BrokerError::NotConnected { vendor: "ibkr" };
        assert_eq!(format!("{}", error), "ibkr is not connected");
    }
}
