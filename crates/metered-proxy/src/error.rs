use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::oracle::OracleError;
use crate::store::StoreError;

/// Why a metered request was turned away with 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    /// The session's token bucket is empty.
    RateLimited,
    /// The gap between expected and paid value exceeds the buffer.
    PaymentOverdue,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::RateLimited => "rate_limited",
            ThrottleReason::PaymentOverdue => "payment_overdue",
        }
    }
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("too many requests: {0}")]
    Throttled(ThrottleReason),

    #[error("balance oracle unavailable: {0}")]
    OracleUnavailable(#[from] OracleError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::EndpointNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidEndpoint(_)
            | GatewayError::InvalidPath(_)
            | GatewayError::InvalidAccount(_) => StatusCode::BAD_REQUEST,
            GatewayError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::OracleUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Store(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            GatewayError::EndpointNotFound(id) => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "endpoint_not_found",
                    "message": format!("Endpoint '{}' not found", id)
                }))
            }
            GatewayError::InvalidEndpoint(msg) => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "invalid_endpoint",
                    "message": msg
                }))
            }
            GatewayError::InvalidPath(msg) => HttpResponse::build(status).json(serde_json::json!({
                "error": "invalid_path",
                "message": msg
            })),
            GatewayError::InvalidAccount(msg) => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "invalid_account",
                    "message": msg
                }))
            }
            GatewayError::Throttled(reason) => {
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "too_many_requests",
                    "reason": reason.as_str(),
                    "message": match reason {
                        ThrottleReason::RateLimited => "Request rate exceeded, slow down",
                        ThrottleReason::PaymentOverdue => "Outstanding balance exceeds the allowed buffer",
                    }
                }))
            }
            GatewayError::OracleUnavailable(e) => {
                tracing::error!(error = %e, "balance oracle unavailable");
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "oracle_unavailable",
                    "message": "Balance lookup failed, try again later"
                }))
            }
            GatewayError::Unauthorized => HttpResponse::build(status).json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required"
            })),
            GatewayError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "upstream_error",
                    "message": "Failed to reach upstream service"
                }))
            }
            GatewayError::UpstreamTimeout(msg) => {
                tracing::warn!("Upstream timeout: {}", msg);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "upstream_timeout",
                    "message": "Upstream service did not respond in time"
                }))
            }
            GatewayError::Store(e) => {
                tracing::error!("Store error: {}", e);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::build(status).json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::EndpointNotFound("zzz".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Throttled(ThrottleReason::RateLimited).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Throttled(ThrottleReason::PaymentOverdue).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::OracleUnavailable(OracleError::Timeout).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout("slow".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_throttle_reason_labels() {
        assert_eq!(ThrottleReason::RateLimited.to_string(), "rate_limited");
        assert_eq!(ThrottleReason::PaymentOverdue.as_str(), "payment_overdue");
    }
}
