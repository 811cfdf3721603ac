// gcfleet/src/error.rs
//
// §7 error kinds, one variant per row in the table.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid inspect link: {0}")]
    InvalidLink(String),

    #[error("retryable session error: {0}")]
    RetryableNetwork(String),

    #[error("authentication rejected: {0}")]
    AuthInvalid(String),

    #[error("free license grant failed: {0}")]
    LicenseFailure(String),

    #[error("GC session lost: {0}")]
    GcLost(String),

    #[error("no GC reply within {ttl_ms}ms")]
    TtlExceeded { ttl_ms: u64 },

    #[error("bot is not ready")]
    NotReady,

    #[error("no free ready bot available")]
    NoBotsAvailable,

    #[error("proxy selector unavailable: {0}")]
    ProxyUnavailable(String),

    #[error("bot has been destroyed")]
    Destroyed,
}
