//! Graph error taxonomy
//!
//! Every failure below the tool layer is classified into one of these
//! variants at the request client boundary and then propagated unchanged
//! through the pagination walker and the hunting executor.

use crate::auth::AuthError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Token could not be acquired, or Graph kept rejecting it
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Caller-supplied parameter rejected locally; nothing was sent
    #[error("{0}")]
    Validation(String),

    /// Graph rejected the request (4xx other than 401/429)
    #[error("HTTP {status}: {body}")]
    Request { status: u16, body: String },

    /// Throttling or unavailability that outlasted the retry budget
    #[error("HTTP {status} after {attempts} attempts: {body}")]
    TransientService {
        status: u16,
        attempts: u32,
        body: String,
    },

    /// Server error that outlasted the retry budget
    #[error("HTTP {status} after {attempts} attempts: {body}")]
    Service {
        status: u16,
        attempts: u32,
        body: String,
    },

    /// Transport failure (DNS, connect, TLS, timeout) after retries
    #[error("{attempts} attempts failed: {source}")]
    Network {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Response arrived but did not have the expected shape
    #[error("{0}")]
    Decode(String),

    /// Polled hunting query reached a terminal failure state
    #[error("hunting query ended with status '{status}': {message}")]
    HuntingFailed { status: String, message: String },

    /// Polled hunting query did not finish in time
    #[error("hunting query still running after {elapsed:?}")]
    Timeout { elapsed: Duration },
}

impl GraphError {
    /// Name of the taxonomy entry, used when rendering errors for callers
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::Auth(_) => "AuthError",
            GraphError::Validation(_) => "ValidationError",
            GraphError::Request { .. } => "RequestError",
            GraphError::TransientService { .. } => "TransientServiceError",
            GraphError::Service { .. } => "ServiceError",
            GraphError::Network { .. } => "NetworkError",
            GraphError::Decode(_) => "DecodeError",
            GraphError::HuntingFailed { .. } => "HuntingQueryError",
            GraphError::Timeout { .. } => "TimeoutError",
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            GraphError::Request { status, .. }
            | GraphError::TransientService { status, .. }
            | GraphError::Service { status, .. } => Some(*status),
            GraphError::Auth(AuthError::TokenRequestFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GraphError::Validation(message.into())
    }
}
