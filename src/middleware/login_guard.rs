use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use super::ClientIp;
use crate::{
    AppState,
    error::{ErrorResponse, ThrottleError},
    security::AttemptOutcome,
};

#[derive(Debug, Deserialize)]
struct LoginIdentity {
    username: Option<String>,
}

/// Progressive delay and lockout in front of the login endpoint.
///
/// Only `POST` to the configured login path is inspected; everything else
/// passes straight through. The body is buffered to read the username and
/// then handed on unchanged.
pub async fn login_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let guard = state.login_guard.clone();
    if !guard.config().enabled
        || req.method() != Method::POST
        || req.uri().path() != state.config.auth.login_path
    {
        return next.run(req).await;
    }

    let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0);
    let path = req.uri().path().to_string();

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, state.config.server.body_limit_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to buffer login body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse::new(
                    "payload_too_large",
                    "Login request body too large",
                )),
            )
                .into_response();
        }
    };
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let identity = login_identity(content_type, &bytes);

    let check = guard.check_attempt(identity.as_deref(), ip).await;
    if check.blocked {
        tracing::info!(
            identity = identity.as_deref().unwrap_or("-"),
            lock_expiry = ?check.lock_expiry,
            "Login attempt blocked"
        );
        return ThrottleError::LoginBlocked {
            path,
            retry_after_secs: check.retry_after_secs(Utc::now()),
            reason: check
                .reason
                .unwrap_or_else(|| "Too many failed login attempts".to_string()),
            lock_expiry: check.lock_expiry,
        }
        .into_response();
    }

    if !check.delay.is_zero() {
        tracing::debug!(delay_ms = check.delay.as_millis() as u64, "Delaying login attempt");
        // A disconnecting client drops this future; shutdown cancels it
        tokio::select! {
            _ = tokio::time::sleep(check.delay) => {}
            _ = state.shutdown.cancelled() => {
                tracing::info!("Login attempt cancelled during delay");
                guard
                    .finish(identity.as_deref(), ip, AttemptOutcome::Abandoned)
                    .await;
                return cancelled();
            }
        }
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;

    let status = response.status();
    let identity = identity.as_deref();
    if status.is_success() {
        guard.record_success(identity, ip).await;
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        guard.record_failure(identity, ip).await;
    } else {
        guard.finish(identity, ip, AttemptOutcome::Abandoned).await;
    }

    response
}

fn cancelled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::with_type(
            "server_error",
            "request_cancelled",
            "Request cancelled",
        )),
    )
        .into_response()
}

/// Username of a login body, JSON or form encoded. Anything unparseable
/// yields `None` and the attempt is tracked by IP alone.
fn login_identity(content_type: &str, body: &Bytes) -> Option<String> {
    let username = if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .find(|(k, _)| k == "username")
            .map(|(_, v)| v.into_owned())
    } else {
        serde_json::from_slice::<LoginIdentity>(body)
            .ok()
            .and_then(|b| b.username)
    };
    username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::json("application/json", r#"{"username":"alice","password":"x"}"#, Some("alice"))]
    #[case::json_trimmed("application/json", r#"{"username":"  bob "}"#, Some("bob"))]
    #[case::json_missing("application/json", r#"{"password":"x"}"#, None)]
    #[case::json_blank("application/json", r#"{"username":""}"#, None)]
    #[case::garbage("application/json", "not json", None)]
    #[case::form(
        "application/x-www-form-urlencoded",
        "username=carol&password=secret",
        Some("carol")
    )]
    #[case::no_content_type("", r#"{"username":"dave"}"#, Some("dave"))]
    fn test_login_identity(
        #[case] content_type: &str,
        #[case] body: &'static str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            login_identity(content_type, &Bytes::from_static(body.as_bytes())).as_deref(),
            expected
        );
    }
}
