//! Error types for the relay
//!
//! Errors are grouped by the stage they occur in: connecting upstream,
//! decoding the upstream wire format, reading mid-stream, serving a client,
//! and loading configuration.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to establish the upstream connection
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Upstream sent something we could not decode
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The established stream failed mid-flight
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// A downstream client request could not be served
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors establishing the upstream connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Transport-level request failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream answered with a non-200 final status
    #[error("request failed with status {0}")]
    Status(StatusCode),

    /// Digest challenge missing required fields or not a Digest challenge
    #[error("malformed digest challenge: {0}")]
    MalformedChallenge(String),
}

/// Errors decoding the upstream multipart framing
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Content-Type is not multipart
    #[error("unexpected media type: {0}")]
    NotMultipart(String),

    /// Content-Type lacks a boundary parameter
    #[error("boundary not found: {0}")]
    MissingBoundary(String),

    /// Part delimiter did not match the negotiated boundary
    #[error("invalid part boundary: {0}")]
    InvalidBoundary(String),

    /// Part header line could not be parsed
    #[error("malformed part header: {0}")]
    MalformedHeader(String),

    /// Legacy mode requires Content-Length inside every part
    #[error("Content-Length part header not found")]
    MissingContentLength,

    /// Content-Length value was not a valid size
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
}

/// Errors on an established stream
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Reading the response body failed
    #[error("read failed: {0}")]
    Read(Box<dyn std::error::Error + Send + Sync>),

    /// The body ended in the middle of a part
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// Errors serving a downstream client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The upstream stream ended before producing a single frame
    #[error("stream failed before first frame")]
    StreamFailed,
}

/// Configuration errors, fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Source URI missing, relative, or unparseable
    #[error("invalid source uri: {0}")]
    InvalidSource(String),

    /// Two sources configured with the same serving path
    #[error("duplicate serving path: {0}")]
    DuplicatePath(String),

    /// Config file could not be read
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Client(ClientError::StreamFailed) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
