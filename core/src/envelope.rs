//! Response decoding and failure classification.
//!
//! The API wraps payloads in an envelope (`success`, `message`, `code`,
//! `data`) but some endpoints answer with the bare payload. Decoding tries
//! the envelope first and falls back to the payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::{FailureKind, TransportFailure};

/// Generic response wrapper used by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            data: Some(data),
        }
    }

    pub fn failure(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            code,
            data: None,
        }
    }
}

/// Decode a 2xx response body into `T`.
///
/// `status` is used as the server error code when a failed envelope omits
/// its own code.
pub fn decode<T: DeserializeOwned>(body: &str, status: u16) -> Result<T, ApiError> {
    if body.trim().is_empty() {
        return decode_absent().ok_or(ApiError::NoData);
    }
    // A failed envelope is reported even when its `data` does not fit `T`.
    match serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        Ok(envelope) if !envelope.success => Err(ApiError::server(
            envelope.code.unwrap_or(i64::from(status)),
            envelope.message,
        )),
        Ok(Envelope { data: Some(data), .. }) => serde_json::from_value(data)
            .or_else(|envelope_err| {
                serde_json::from_str(body).map_err(|_| ApiError::Decoding(envelope_err.to_string()))
            }),
        Ok(_) => decode_absent()
            .or_else(|| serde_json::from_str(body).ok())
            .ok_or(ApiError::NoData),
        Err(_) => serde_json::from_str(body).map_err(|e| ApiError::Decoding(e.to_string())),
    }
}

/// Types such as `()` or `Option<_>` accept a missing payload as `null`.
fn decode_absent<T: DeserializeOwned>() -> Option<T> {
    serde_json::from_value(serde_json::Value::Null).ok()
}

/// Map a non-2xx HTTP status to an `ApiError`, keeping the body's `message`
/// field when there is one.
pub fn classify_http_status(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string));
    match status {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        _ => ApiError::server(i64::from(status), message),
    }
}

/// Map a failure reported by the HTTP library to an `ApiError`.
pub fn classify_transport_failure(failure: &TransportFailure) -> ApiError {
    match failure.kind {
        FailureKind::NotConnected | FailureKind::ConnectionLost => ApiError::NetworkUnavailable,
        FailureKind::TimedOut => ApiError::Timeout,
        FailureKind::BadUrl | FailureKind::UnsupportedUrl => ApiError::InvalidUrl,
        FailureKind::Other => ApiError::Unknown(failure.message.clone()),
    }
}
