//! Error types for the kitchen API client.
//!
//! # Design
//! `ApiError` is a closed set: every failure on the network path (catalog,
//! transport, decoding) ends in exactly one variant before any caller sees
//! it. Each variant carries a stable numeric code so hosts on the other side
//! of the FFI boundary can switch on it without parsing messages.

use thiserror::Error;

/// Errors returned by every network operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The base URL or a path could not be turned into a valid URL.
    #[error("invalid URL")]
    InvalidUrl,

    /// The server answered with an empty body where a payload was required.
    #[error("no data in response")]
    NoData,

    /// The response body could not be deserialized into the expected type.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// The request payload (JSON or image) could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The HTTP library failed in a way that is not otherwise classified.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server reported a failure, either through the envelope or the
    /// HTTP status.
    #[error("server error {code}: {}", message.as_deref().unwrap_or("no message"))]
    Server { code: i64, message: Option<String> },

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ApiError {
    /// Stable numeric code reported across the FFI boundary.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::InvalidUrl => 1000,
            ApiError::NoData => 1001,
            ApiError::Decoding(_) => 1002,
            ApiError::Encoding(_) => 1003,
            ApiError::Transport(_) => 1004,
            ApiError::Server { .. } => 1005,
            ApiError::NetworkUnavailable => 1006,
            ApiError::Timeout => 1007,
            ApiError::Unauthorized => 1008,
            ApiError::Forbidden => 1009,
            ApiError::NotFound => 1010,
            ApiError::Unknown(_) => 1099,
        }
    }

    pub fn server(code: i64, message: Option<String>) -> Self {
        ApiError::Server { code, message }
    }

    /// Whether this error should end the current auth session.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            ApiError::InvalidUrl,
            ApiError::NoData,
            ApiError::Decoding(String::new()),
            ApiError::Encoding(String::new()),
            ApiError::Transport(String::new()),
            ApiError::server(500, None),
            ApiError::NetworkUnavailable,
            ApiError::Timeout,
            ApiError::Unauthorized,
            ApiError::Forbidden,
            ApiError::NotFound,
            ApiError::Unknown(String::new()),
        ];
        let mut codes: Vec<i32> = all.iter().map(ApiError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn server_error_display_includes_message() {
        let err = ApiError::server(422, Some("name is required".to_string()));
        assert_eq!(err.to_string(), "server error 422: name is required");
        let err = ApiError::server(500, None);
        assert_eq!(err.to_string(), "server error 500: no message");
    }

    #[test]
    fn only_unauthorized_requires_reauth() {
        assert!(ApiError::Unauthorized.requires_reauth());
        assert!(!ApiError::Forbidden.requires_reauth());
        assert!(!ApiError::NetworkUnavailable.requires_reauth());
    }
}
