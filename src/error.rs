//! HTTP error bodies.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Standard error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type classification (e.g., "authentication_error")
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    /// Machine-readable error code
    pub code: Option<String>,
    /// Request ID for correlating errors with logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_type("invalid_request_error", code, message)
    }

    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: Some(code.into()),
                request_id: None,
            },
        }
    }
}

/// Body of every 429 response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ThrottleBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub details: serde_json::Value,
}

/// A request refused for volume or brute-force reasons.
#[derive(Debug, Clone)]
pub enum ThrottleError {
    RateLimited {
        path: String,
        tier: &'static str,
        limit: u32,
        retry_after_secs: u64,
    },
    LoginBlocked {
        path: String,
        reason: String,
        retry_after_secs: u64,
        lock_expiry: Option<DateTime<Utc>>,
    },
}

impl ThrottleError {
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            ThrottleError::RateLimited {
                retry_after_secs, ..
            }
            | ThrottleError::LoginBlocked {
                retry_after_secs, ..
            } => *retry_after_secs,
        }
    }

    fn body(&self) -> ThrottleBody {
        let (path, message, details) = match self {
            ThrottleError::RateLimited {
                path,
                tier,
                limit,
                retry_after_secs,
            } => (
                path.clone(),
                format!("Rate limit exceeded. Try again in {retry_after_secs} seconds."),
                serde_json::json!({
                    "tier": tier,
                    "limit": limit,
                    "retryAfterSeconds": retry_after_secs,
                }),
            ),
            ThrottleError::LoginBlocked {
                path,
                reason,
                retry_after_secs,
                lock_expiry,
            } => (
                path.clone(),
                reason.clone(),
                serde_json::json!({
                    "retryAfterSeconds": retry_after_secs,
                    "lockExpiry": lock_expiry,
                }),
            ),
        };

        ThrottleBody {
            timestamp: Utc::now(),
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            error: "Too Many Requests".to_string(),
            message,
            path,
            details,
        }
    }
}

impl IntoResponse for ThrottleError {
    fn into_response(self) -> Response {
        let kind = match &self {
            ThrottleError::RateLimited { .. } => "rate_limited",
            ThrottleError::LoginBlocked { .. } => "login_blocked",
        };
        metrics::record_throttled(kind);

        let retry_after = self.retry_after_secs().max(1);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self.body())).into_response();

        let value = HeaderValue::try_from(retry_after.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("1"));
        response.headers_mut().insert(header::RETRY_AFTER, value);

        response
    }
}
