//! Bus error types.
//!
//! Every public API in this crate returns [`BusError`] through [`BusResult`].
//! Callers upstream treat any of these as a transport failure.

/// Errors raised by the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has been closed and no longer accepts publishers or subscribers.
    #[error("message bus is closed")]
    Closed,

    /// The payload exceeds the configured per-message limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Topic names must be non-empty and free of whitespace.
    #[error("invalid topic `{topic}`")]
    InvalidTopic { topic: String },

    /// Catch-all for bus implementations backed by an external transport.
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// Convenience alias used throughout the kernel crate.
pub type BusResult<T> = std::result::Result<T, BusError>;
