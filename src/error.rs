use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Header carrying the caller's remaining daily quota.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

/// Errors surfaced to the client.  Generation and parse failures are not
/// here; they become a fallback response instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("request body exceeds {limit} characters")]
    PayloadTooLarge { limit: usize },
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("method not allowed")]
    MethodNotAllowed { allow: &'static str },
    #[error("daily advice limit reached")]
    QuotaExceeded { remaining: u32 },
    #[error("{0}")]
    Configuration(&'static str),
    #[error("quota service unavailable")]
    QuotaService,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Configuration(_) | ApiError::QuotaService => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "Invalid request",
            ApiError::PayloadTooLarge { .. } => "Payload too large",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::MethodNotAllowed { .. } => "Method not allowed",
            ApiError::QuotaExceeded { .. } => "Rate limit exceeded",
            ApiError::Configuration(_) => "Service misconfigured",
            ApiError::QuotaService => "Quota check failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.title().to_string(),
            message: self.to_string(),
            remaining: match self {
                ApiError::QuotaExceeded { .. } => Some(0),
                _ => None,
            },
        };
        let mut resp = (status, Json(body)).into_response();
        match self {
            ApiError::MethodNotAllowed { allow } => {
                resp.headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(allow));
            }
            ApiError::QuotaExceeded { remaining } => {
                set_remaining(&mut resp, remaining);
            }
            _ => {}
        }
        resp
    }
}

pub fn set_remaining(resp: &mut Response, remaining: u32) {
    resp.headers_mut()
        .insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_carries_header_and_zero_remaining() {
        let resp = ApiError::QuotaExceeded { remaining: 0 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RATE_LIMIT_REMAINING], "0");
    }

    #[test]
    fn method_not_allowed_sets_allow() {
        let resp = ApiError::MethodNotAllowed { allow: "GET" }.into_response();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET");
    }

    #[test]
    fn service_errors_omit_quota_header() {
        let resp = ApiError::QuotaService.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(RATE_LIMIT_REMAINING).is_none());
    }
}
