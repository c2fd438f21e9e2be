//! The errors of the crate.

use std::io;

use thiserror::Error;

/// The errors that can occur when encoding or decoding messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("CoAP error: truncated or malformed message")]
    Malformed,
    #[error("CoAP error: unsupported version {0}")]
    BadVersion(u8),
    #[error("CoAP error: invalid token length {0}")]
    InvalidTokenLength(u8),
    #[error("CoAP error: invalid option delta")]
    InvalidOptionDelta,
    #[error("CoAP error: invalid option length")]
    InvalidOptionLength,
    #[error("CoAP error: unknown critical option {0}")]
    UnknownCriticalOption(u16),
    #[error("CoAP error: malformed value for option {0}")]
    IncompatibleOptionValue(u16),
    #[error("CoAP error: empty message carrying token, options or payload")]
    InvalidEmptyMessage,
}

/// The errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid CoAP URI: {0}")]
    BadUri(String),
    #[error("unrecognized content format `{0}`")]
    BadContentFormat(String),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("no reply before the retransmission budget was exhausted")]
    TimedOut,
    #[error("peer reset the exchange")]
    Reset,
    #[error("endpoint I/O failure: {0}")]
    Endpoint(#[from] io::Error),
    #[error("client is closed")]
    Closed,
}
