//! Error types for the lab dashboard server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::lab::LabId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the lab dashboard server
#[derive(Debug, Error)]
pub enum Error {
    // Lab errors (2000-2999)
    #[error("Lab not found: {0}")]
    LabNotFound(LabId),

    #[error("Lab in invalid state: expected {expected}, got {actual}")]
    InvalidLabState { expected: String, actual: String },

    #[error("Lab limit exceeded: at most {0} active labs")]
    LabLimitExceeded(usize),

    // Access errors (3000-3999)
    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("{capability} access is disabled for VM {vm}")]
    CapabilityDisabled { vm: String, capability: String },

    // Provisioning backend errors (5000-5999)
    #[error("Provisioning service unavailable: {0}")]
    ServiceUnavailable(String),

    // General errors (1000-1999)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a state error naming the expected and the actual status
    pub fn invalid_state(expected: &str, actual: &str) -> Self {
        Error::InvalidLabState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Lab errors (2000-2999)
            Error::LabNotFound(_) => 2001,
            Error::InvalidLabState { .. } => 2002,
            Error::LabLimitExceeded(_) => 2003,

            // Access errors (3000-3999)
            Error::VmNotFound(_) => 3001,
            Error::CapabilityDisabled { .. } => 3002,

            // Provisioning backend errors (5000-5999)
            Error::ServiceUnavailable(_) => 5001,

            // General errors (1000-1999)
            Error::InvalidArgument(_) => 1001,
            Error::Internal(_) => 1002,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::LabNotFound(_) | Error::VmNotFound(_) => StatusCode::NOT_FOUND,

            Error::InvalidLabState { .. } | Error::CapabilityDisabled { .. } => {
                StatusCode::CONFLICT
            }

            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,

            Error::LabLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,

            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ServiceUnavailable(err.to_string())
    }
}
