//! # Client Errors
//!
//! Every failure maps onto one of the negative `StatusCode`s so callers
//! that only care about the numeric taxonomy can call `status()`.

use ckv_common::{CkvError, StatusCode};
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Caller passed a malformed argument or configuration.
    #[error("invalid parameter: {0}")]
    Param(String),
    /// Shared type could not be built from the given input.
    #[error(transparent)]
    Common(#[from] CkvError),
    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Request could not be delivered (no route, no connection, client invalid).
    #[error("request failed: {0}")]
    Request(String),
    /// No pooled connection became free within the retry window.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Operation is not available in the current mode.
    #[error("operation not supported")]
    NotSupported,
    /// The slot moved to another shard while a pinned connection was in use.
    #[error("slot changed: {message}")]
    SlotChanged { message: String },
}

impl ClientError {
    /// Maps the error onto the status-code taxonomy.
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::Param(_) | ClientError::Common(_) => StatusCode::ParamError,
            ClientError::Server { .. } | ClientError::UnexpectedResponse => StatusCode::ReplyError,
            ClientError::Io(_) | ClientError::Protocol | ClientError::Request(_) => {
                StatusCode::RequestError
            }
            ClientError::PoolExhausted => StatusCode::NoResource,
            ClientError::NotSupported => StatusCode::NotSupported,
            ClientError::SlotChanged { .. } => StatusCode::SlotChanged,
        }
    }

    /// Builds the error for a failed status, keeping the server's error text
    /// when there is one.
    pub(crate) fn from_status(status: StatusCode, message: Option<String>) -> Self {
        match status {
            StatusCode::ParamError => {
                ClientError::Param(message.unwrap_or_else(|| "invalid argument".to_string()))
            }
            StatusCode::ReplyError => match message {
                Some(message) => ClientError::Server { message },
                None => ClientError::UnexpectedResponse,
            },
            StatusCode::NoResource => ClientError::PoolExhausted,
            StatusCode::NotSupported => ClientError::NotSupported,
            StatusCode::SlotChanged => ClientError::SlotChanged {
                message: message.unwrap_or_default(),
            },
            other => ClientError::Request(message.unwrap_or_else(|| other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_round_trips() {
        for status in [
            StatusCode::ParamError,
            StatusCode::ReplyError,
            StatusCode::RequestError,
            StatusCode::NoResource,
            StatusCode::NotSupported,
            StatusCode::SlotChanged,
        ] {
            assert_eq!(ClientError::from_status(status, None).status(), status);
        }
    }

    #[test]
    fn server_message_is_kept() {
        let err = ClientError::from_status(StatusCode::ReplyError, Some("ERR boom".into()));
        assert_eq!(err.to_string(), "server error: ERR boom");
    }

    #[test]
    fn io_maps_to_request_error() {
        let err = ClientError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(err.status(), StatusCode::RequestError);
    }
}
