//! Error types for the exporter.
//!
//! Client and parse errors never leave the poller: they are recorded in the
//! registry and surface only through the exporter health metrics. Startup
//! errors abort the process.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors from talking to the modem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The modem did not answer after all network retries.
    #[error("modem unreachable: {0}")]
    Unreachable(String),

    /// Login was refused, or a fresh session was rejected again.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The modem answered with a non-success HTTP status.
    #[error("upstream returned HTTP {0}")]
    UpstreamError(u16),

    /// The modem answered with an API error envelope.
    #[error("device error {code}: {message}")]
    Device { code: i64, message: String },
}

impl ClientError {
    /// Short machine-friendly classification used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Unreachable(_) => "unreachable",
            ClientError::AuthFailed(_) => "auth_failed",
            ClientError::UpstreamError(_) => "upstream_error",
            ClientError::Device { .. } => "device_error",
        }
    }
}

/// Errors from turning a raw payload into a snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("malformed value for field: {0}")]
    MalformedValue(String),

    #[error("payload does not match the device family template")]
    UnexpectedFormat,
}

impl ParseError {
    pub(crate) fn missing(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }

    pub(crate) fn malformed(name: impl Into<String>) -> Self {
        Self::MalformedValue(name.into())
    }

    /// Short machine-friendly classification used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MissingField(_) => "missing_field",
            ParseError::MalformedValue(_) => "malformed_value",
            ParseError::UnexpectedFormat => "unexpected_format",
        }
    }
}

/// A failed poll cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The whole fetch did not finish within the cycle deadline.
    #[error("poll cycle exceeded {0} ms")]
    Deadline(u64),
}

impl PollError {
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::Client(e) => e.kind(),
            PollError::Parse(e) => e.kind(),
            PollError::Deadline(_) => "deadline",
        }
    }
}

/// Fatal errors while starting the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_error_kind() {
        let err: PollError = ClientError::UpstreamError(503).into();
        assert_eq!(err.kind(), "upstream_error");

        let err: PollError = ParseError::missing("sinr").into();
        assert_eq!(err.kind(), "missing_field");
        assert_eq!(err.to_string(), "missing field: sinr");

        assert_eq!(PollError::Deadline(5000).kind(), "deadline");
    }
}
