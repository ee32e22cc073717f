use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Uri, header},
    middleware::Next,
    response::Response,
};

use super::ClientIp;
use crate::{
    AppState,
    auth::{AuthOutcome, Principal, TokenClaims, TokenError, TokenKind, VerifiedClaims},
    config::AuthConfig,
    observability::{
        metrics,
        security::{self, AlertContext, SecurityEvent},
    },
};

pub const AUTH_STATUS_HEADER: &str = "X-Auth-Status";

/// Establish the request's principal from a bearer token.
///
/// Never rejects: a missing, invalid or unusable credential leaves the
/// request anonymous. An expired token is flagged with
/// `X-Auth-Status: token-expired` so clients know to refresh.
pub async fn authentication_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<Principal>().is_some() {
        return next.run(req).await;
    }

    let outcome = match bearer_token(req.headers(), req.uri(), &state.config.auth) {
        None => AuthOutcome::Anonymous,
        Some(token) => match state.tokens.decode_kind(&token, TokenKind::Access) {
            Ok(claims) => {
                let ip = req.extensions().get::<ClientIp>().and_then(|c| c.0);
                match load_principal(&state, &claims, ip).await {
                    Some(principal) => {
                        tracing::debug!(
                            user = %principal.username,
                            tenant_id = %principal.tenant_id,
                            "Request authenticated"
                        );
                        req.extensions_mut().insert(principal);
                        req.extensions_mut().insert(VerifiedClaims(claims));
                        AuthOutcome::Authenticated
                    }
                    None => AuthOutcome::AccountRejected,
                }
            }
            Err(TokenError::Expired) => AuthOutcome::TokenExpired,
            Err(_) => AuthOutcome::Anonymous,
        },
    };

    metrics::record_auth_outcome(outcome.as_str());
    req.extensions_mut().insert(outcome);

    let mut response = next.run(req).await;
    if outcome == AuthOutcome::TokenExpired {
        response.headers_mut().insert(
            AUTH_STATUS_HEADER,
            HeaderValue::from_static(AuthOutcome::TokenExpired.as_str()),
        );
    }
    response
}

/// Look the token's subject up in the directory and build the principal.
/// Unknown, disabled and locked accounts yield `None`.
async fn load_principal(
    state: &AppState,
    claims: &TokenClaims,
    ip: Option<std::net::IpAddr>,
) -> Option<Principal> {
    let record = match state.principals.find_by_id(claims.user_id).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, user_id = %claims.user_id, "Principal lookup failed");
            return None;
        }
    };

    let rejected = |reason: &str| {
        security::emit(
            SecurityEvent::AccountRejected,
            &AlertContext {
                principal: Some(claims.sub.clone()),
                ip,
                ..Default::default()
            },
            &format!("Valid token for unusable account: {reason}"),
        );
        None
    };

    let Some(record) = record else {
        return rejected("unknown account");
    };
    if !record.username.eq_ignore_ascii_case(&claims.sub) {
        return rejected("subject does not match account");
    }
    if record.disabled {
        return rejected("account disabled");
    }
    if record.locked {
        return rejected("account locked");
    }

    let tenant_name = match state.tenants.find_by_id(record.tenant_id).await {
        Ok(Some(tenant)) => tenant.name,
        _ => claims.company_name.clone().unwrap_or_default(),
    };

    Some(Principal::from_record(record, tenant_name))
}

/// Locate a bearer credential.
///
/// The `Authorization` header always counts. The `token` query parameter
/// only counts for upgrade requests and allow-listed streaming paths, where
/// browsers cannot set headers.
pub(crate) fn bearer_token(headers: &HeaderMap, uri: &Uri, config: &AuthConfig) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        return (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty())
            .then(|| token.to_string());
    }

    let upgrade = headers.contains_key(header::UPGRADE);
    if !upgrade && !config.allows_query_token(uri.path()) {
        return None;
    }

    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, v)| k == "token" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
