//! Error types for control channel operations

use mediactl_types::Method;
use thiserror::Error;

/// Failures surfaced to the caller of a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Request rejected: {reason}")]
    Rejected { reason: String },

    #[error("Invalid request {method}: {reason}")]
    InvalidRequest { method: Method, reason: String },

    #[error("Invalid response to {method}: {reason}")]
    InvalidResponse { method: Method, reason: String },
}

/// Protocol anomalies on inbound or outbound frames
///
/// These never reach a caller; the channel logs them and drops the frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Response for unknown request id {0}")]
    UnmatchedResponse(u32),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RequestError>;
