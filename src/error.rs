use thiserror::Error;

/// Failures surfaced through the public API.
///
/// Parse failures on untrusted relay payloads are logged and contained at
/// the component boundary; they never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied a malformed relay address. Rejected before any
    /// state change.
    #[error("invalid relay address: {0}")]
    Validation(String),

    /// The handshake with the relay failed or timed out. Reflected in the
    /// connection status; retry is an explicit new connect call.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Opening a subscription failed. Recoverable; no global state is
    /// affected.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// An explicit relay-discovery refresh failed. The previously built
    /// catalog stays available.
    #[error("relay discovery failed: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, Error>;
