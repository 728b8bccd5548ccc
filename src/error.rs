//! Error types for REST calls.
//!
//! Every failure the recovery pipeline cannot resolve ends up as an
//! [`ApiError`]. Variants map one-to-one to the response shapes the
//! classifier recognises, plus transport and local failures.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::credential::StoreError;
use crate::transport::HttpError;

/// Decoded JSON object returned by the REST API.
pub type ApiResponse = Map<String, Value>;

/// Renders a raw response the way the API sent it.
fn render(response: &ApiResponse) -> String {
    serde_json::to_string(response).unwrap_or_default()
}

/// Error type for REST calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The active credential cannot be used; nothing was sent.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The API kept answering with an empty body.
    #[error("Bitrix24 returned an empty response to your request.")]
    EmptyResponse,

    /// `QUERY_LIMIT_EXCEEDED` with retrying disabled.
    #[error("Query limit exceeded: {}", render(.response))]
    QueryLimitExceeded {
        /// Raw error response.
        response: ApiResponse,
    },

    /// `OPERATION_TIME_LIMIT` with retrying disabled.
    #[error("Operation time limit reached: {}", render(.response))]
    OperationTimeLimit {
        /// Raw error response.
        response: ApiResponse,
    },

    /// The credential lacks access to the requested method.
    #[error("Access denied: {}", render(.response))]
    AccessDenied {
        /// Raw error response.
        response: ApiResponse,
    },

    /// Token refresh failed.
    #[error(transparent)]
    RefreshToken(#[from] RefreshTokenError),

    /// Any other `error` / `error_description` response.
    #[error("API error: {}", render(.response))]
    Api {
        /// Raw error response.
        response: ApiResponse,
    },

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(#[from] HttpError),

    /// The body was JSON but not an object.
    #[error("Unexpected response body: {0}")]
    UnexpectedResponse(String),

    /// The dispatcher resent the same request too many times.
    #[error("Request was retried {attempts} times without a final response")]
    RetryLoopExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Credential persistence failed.
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    /// One query of a batch failed.
    #[error("Batch query #{index} failed: {error}")]
    BatchItem {
        /// Position of the query in the submitted list.
        index: usize,
        /// The per-query error entry.
        error: Value,
    },
}

impl ApiError {
    /// Returns the raw API response carried by the error, if any.
    #[must_use]
    pub const fn response(&self) -> Option<&ApiResponse> {
        match self {
            Self::QueryLimitExceeded { response }
            | Self::OperationTimeLimit { response }
            | Self::AccessDenied { response }
            | Self::Api { response } => Some(response),
            _ => None,
        }
    }
}

/// Reasons a token refresh can fail.
#[derive(Debug, Error)]
pub enum RefreshTokenError {
    /// The OAuth server rejected the application credentials.
    #[error(
        "{} An error occurred during the token refresh request. The application's client_id or client_secret are incorrect.",
        render(.response)
    )]
    WrongClient {
        /// Raw OAuth response.
        response: ApiResponse,
    },

    /// The refresh token is unusable.
    #[error(
        "{} An error occurred during the token refresh request. The refresh token is either invalid or expired, or the application's client_id and client_secret are incorrect.",
        render(.response)
    )]
    InvalidGrant {
        /// Raw OAuth response.
        response: ApiResponse,
    },

    /// Any other OAuth error.
    #[error("Token refresh rejected: {}", render(.response))]
    Rejected {
        /// Raw OAuth response.
        response: ApiResponse,
    },

    /// The refresh budget is spent.
    #[error("Token refresh attempt limit exceeded. Maximum allowed attempts: {limit}")]
    AttemptLimitExceeded {
        /// Configured attempt limit.
        limit: u32,
    },

    /// The OAuth response lacks the token fields.
    #[error("Malformed token refresh response: {0}")]
    Malformed(String),

    /// The expired-token rule fired without a token credential.
    #[error("Token refresh requires a token credential")]
    MissingCredential,
}
