/// Classification for retry policy.
///
/// Used by [`RetryPolicy`](crate::retry::RetryPolicy) and the batch loops to decide
/// how to react to a failed vendor operation.
///
/// # Behavior Summary
///
/// | Class | Retry this symbol? | Continue the batch? |
/// |-------|--------------------|---------------------|
/// | `Never` | Yes, up to the retry budget | Yes |
/// | `WithBackoff` | Yes, with exponential backoff | Yes |
/// | `AbortBatch` | No | No, remaining symbols get empty results |
///
/// `Never` and `WithBackoff` share the per-symbol backoff; the split marks which
/// failures are expected to clear on their own when logged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Bad input, unsupported request or local failure.
    /// Repeating the same request is unlikely to help.
    Never,

    /// Transient failure such as a timeout or a dropped transport.
    /// Retry the whole per-symbol operation after a backoff delay.
    WithBackoff,

    /// The vendor session is gone.
    ///
    /// Every following call in the batch would fail the same way, so the batch
    /// stops issuing vendor calls and reports empty results for what remains.
    AbortBatch,
}
