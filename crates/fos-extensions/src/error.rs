//! Extension API errors

use std::time::Duration;

/// Errors surfaced by the extension API
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The call is not available in this context or not implemented
    #[error("{0} is not supported")]
    NotSupported(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid extension URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Errors reported by a [`Transport`](crate::Transport) round-trip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport closed")]
    Closed,

    #[error("Request rejected: {0}")]
    Rejected(String),
}
