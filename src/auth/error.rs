use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{error::ErrorResponse, observability::metrics};

/// Errors returned by the credential endpoints.
///
/// Pipeline stages never return these: a bad bearer token makes the request
/// anonymous rather than failing it.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication credentials required")]
    MissingCredentials,

    /// Unknown user, wrong password, disabled or locked account. One variant
    /// for all of them so responses cannot be used to enumerate accounts.
    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Authentication token has expired")]
    ExpiredToken,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::ExpiredToken => "expired_token",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingCredentials => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        let code = self.code();
        metrics::record_auth_failure(code);

        let message = match &self {
            // Internal details stay in the logs
            AuthError::Internal(detail) => {
                tracing::error!(error = %detail, "Authentication endpoint failed");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse::with_type("authentication_error", code, message);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_is_401() {
        let response = AuthError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_missing_credentials_is_400() {
        let response = AuthError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_is_500() {
        let response = AuthError::Internal("db down".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
