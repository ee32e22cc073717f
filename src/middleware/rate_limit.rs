use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{ClientIp, authentication::bearer_token};
use crate::{
    AppState,
    auth::TokenKind,
    error::ThrottleError,
    ratelimit::{BucketKey, Tier},
};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "X-Rate-Limit-Limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-Rate-Limit-Remaining";

/// Token-bucket throttling.
///
/// Runs before authentication, so the bearer token is decoded here only to
/// pick the bucket and tier. A token that fails to decode draws from the
/// caller's IP bucket at the public tier.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let config = state.rate_limiter.config();
    let path = req.uri().path().to_string();

    if !config.enabled || config.exempt_paths.iter().any(|p| path_matches(&path, p)) {
        return next.run(req).await;
    }

    let claims = bearer_token(req.headers(), req.uri(), &state.config.auth)
        .and_then(|token| state.tokens.decode_kind(&token, TokenKind::Access).ok());

    let public_path = config.public_paths.iter().any(|p| path_matches(&path, p));
    let admin = claims
        .as_ref()
        .is_some_and(|c| c.roles.iter().any(|r| config.admin_roles.contains(r)));
    let tier = Tier::select(claims.is_some(), public_path, admin);

    let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0);
    let principal = claims.as_ref().map(|c| c.user_id.to_string());
    let key = BucketKey::derive(principal.as_deref(), ip, config.per_ip);

    let decision = state.rate_limiter.try_consume(&key, tier).await;
    if !decision.allowed {
        tracing::info!(
            bucket = %key,
            tier = tier.as_str(),
            retry_after_secs = decision.retry_after_secs,
            "Rate limit exceeded"
        );
        return ThrottleError::RateLimited {
            path,
            tier: tier.as_str(),
            limit: decision.limit,
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response();
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
    response
}

/// Prefix match on path segments. A pattern ending in `/` matches anything
/// below it; otherwise the path must equal the pattern or continue with `/`.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.ends_with('/') {
        return path.starts_with(pattern);
    }
    path == pattern
        || path
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}
