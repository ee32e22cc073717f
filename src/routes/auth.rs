//! Credential endpoints.
//!
//! - `POST /auth/login` exchanges a username and password for an access and
//!   a refresh token. The login guard stage sits in front of it and reads the
//!   response status to count failures.
//! - `POST /auth/refresh` exchanges a refresh token for a fresh pair.
//!
//! Both paths are configurable (`auth.login_path`, `auth.refresh_path`).

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    auth::{AuthError, Principal, TokenError, TokenKind},
    directory::{PrincipalRecord, UNKNOWN_USER_HASH, verify_password_hash},
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user_id: uuid::Uuid,
    pub username: String,
    pub tenant_id: uuid::Uuid,
    pub tenant_name: String,
}

#[tracing::instrument(name = "auth.login", skip(state, body), fields(username = %body.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let username = body.username.trim();
    if username.is_empty() || body.password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let record = state
        .principals
        .find_by_username(username)
        .await
        .map_err(|e| AuthError::Internal(format!("Principal lookup failed: {e}")))?;

    // Unknown users pay for a hash check too, so timing does not reveal
    // whether the account exists
    let hash = record
        .as_ref()
        .map_or(UNKNOWN_USER_HASH, |r| r.password_hash.as_str())
        .to_string();
    let password = body.password;
    let verified =
        tokio::task::spawn_blocking(move || verify_password_hash(&hash, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("Password check failed: {e}")))?;

    let Some(record) = record else {
        tracing::info!("Login failed: unknown user");
        return Err(AuthError::InvalidCredentials);
    };

    if !verified {
        tracing::info!(user_id = %record.id, "Login failed: wrong password");
        return Err(AuthError::InvalidCredentials);
    }
    if !record.is_usable() {
        tracing::info!(
            user_id = %record.id,
            disabled = record.disabled,
            locked = record.locked,
            "Login failed: account not usable"
        );
        return Err(AuthError::InvalidCredentials);
    }

    let principal = principal_for(&state, record).await;
    tracing::info!(user_id = %principal.user_id, tenant_id = %principal.tenant_id, "Login succeeded");
    issue_pair(&state, &principal).map(Json)
}

#[tracing::instrument(name = "auth.refresh", skip(state, body))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let token = body.refresh_token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let claims = state
        .tokens
        .decode_kind(token, TokenKind::Refresh)
        .map_err(|e| match e {
            TokenError::Expired => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        })?;

    let record = state
        .principals
        .find_by_id(claims.user_id)
        .await
        .map_err(|e| AuthError::Internal(format!("Principal lookup failed: {e}")))?
        .filter(|r| r.is_usable() && r.username.eq_ignore_ascii_case(&claims.sub))
        .ok_or(AuthError::InvalidToken)?;

    let principal = principal_for(&state, record).await;
    tracing::debug!(user_id = %principal.user_id, "Tokens refreshed");
    issue_pair(&state, &principal).map(Json)
}

async fn principal_for(state: &AppState, record: PrincipalRecord) -> Principal {
    let tenant_name = match state.tenants.find_by_id(record.tenant_id).await {
        Ok(Some(tenant)) => tenant.name,
        Ok(None) => String::new(),
        Err(e) => {
            tracing::warn!(error = %e, tenant_id = %record.tenant_id, "Tenant lookup failed");
            String::new()
        }
    };
    Principal::from_record(record, tenant_name)
}

fn issue_pair(state: &AppState, principal: &Principal) -> Result<TokenResponse, AuthError> {
    let access_token = state
        .tokens
        .issue_access_token(principal)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    let refresh_token = state
        .tokens
        .issue_refresh_token(principal)
        .map_err(|e| AuthError::Internal(e.to_string()))?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_ttl_secs(),
        user_id: principal.user_id,
        username: principal.username.clone(),
        tenant_id: principal.tenant_id,
        tenant_name: principal.tenant_name.clone(),
    })
}
