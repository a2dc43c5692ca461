//! Gateway-wide error type and its HTTP status mapping.
//!
//! Every handler in [`crate::llmgate::server`] returns `Result<_,
//! GatewayError>`; the [`axum::response::IntoResponse`] impl below renders a JSON
//! `{"error": {"message", "kind"}}` body with the status code assigned to
//! each kind below.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// A gateway-level failure, tagged with the kind that determines its HTTP
/// status code.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed JSON or a missing required field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Missing, unknown, or expired bearer token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Token scope violation, or an admin endpoint called without the admin
    /// token.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Unknown provider key or model.
    #[error("not found: {0}")]
    NotFound(String),
    /// A device flow is already pending, or a token name collides.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The upstream provider answered with a non-2xx status.
    #[error("upstream error: {0}")]
    UpstreamBadGateway(String),
    /// The upstream provider could not be reached at all.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// AEAD tag verification failed, or ciphertext was too short to contain
    /// a nonce and tag.
    #[error("crypto error: {0}")]
    CryptoError(String),
    /// Store or encoding failure with no more specific kind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The stable string surfaced in the JSON body's `"kind"` field.
    fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::UpstreamBadGateway(_) => "upstream_bad_gateway",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::CryptoError(_) => "crypto_error",
            GatewayError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::UpstreamBadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CryptoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    kind: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let kind = self.kind();
        log::error!("request failed: kind={kind} status={status} message={self}");
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                kind,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_each_error_kind() {
        assert_eq!(
            GatewayError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::UpstreamBadGateway("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::CryptoError("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
