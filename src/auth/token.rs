//! Signed bearer tokens.
//!
//! Access and refresh tokens share one claim layout and one HMAC key; they
//! differ only in lifetime and the `type` claim. A refresh token is never
//! accepted where an access token is expected.

use std::collections::HashMap;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Principal, SigningKey};
use crate::config::AuthConfig;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Claim set carried by every token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (login name)
    pub sub: String,

    #[serde(rename = "userId")]
    pub user_id: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(rename = "companyId", default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,

    #[serde(rename = "companyName", default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Absent on access tokens, `"refresh"` on refresh tokens.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued at (Unix timestamp)
    pub iat: u64,

    /// Expiration time (Unix timestamp)
    pub exp: u64,

    /// All other claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenClaims {
    /// The token kind, or `None` for an unrecognised `type` claim.
    pub fn kind(&self) -> Option<TokenKind> {
        match self.token_type.as_deref() {
            None | Some("access") => Some(TokenKind::Access),
            Some("refresh") => Some(TokenKind::Refresh),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signature does not verify")]
    InvalidSignature,

    #[error("token is malformed")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token algorithm or type is not supported")]
    Unsupported,

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl TokenError {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Malformed => "malformed",
            TokenError::Expired => "expired",
            TokenError::Unsupported => "unsupported",
            TokenError::Encoding(_) => "encoding",
        }
    }
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
    issuer: Option<String>,
}

impl TokenService {
    pub fn new(key: &SigningKey, config: &AuthConfig) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        if let Some(iss) = &config.issuer {
            validation.set_issuer(&[iss]);
            validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        } else {
            validation.set_required_spec_claims(&["exp", "sub"]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(key.as_bytes()),
            decoding_key: DecodingKey::from_secret(key.as_bytes()),
            validation,
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
            issuer: config.issuer.clone(),
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    /// Issue a short-lived token carrying identity, tenant and authorities.
    pub fn issue_access_token(&self, principal: &Principal) -> Result<String, TokenError> {
        let claims = self.access_claims(principal, now_secs());
        self.encode_claims(&claims)
    }

    /// Issue a long-lived token that can only be exchanged for a new access token.
    pub fn issue_refresh_token(&self, principal: &Principal) -> Result<String, TokenError> {
        let claims = self.refresh_claims(principal, now_secs());
        self.encode_claims(&claims)
    }

    /// Verify signature and expiry. Never panics; failures are logged at debug.
    pub fn validate(&self, token: &str) -> bool {
        self.decode(token).is_ok()
    }

    /// Verified claims, or `None` on any failure.
    pub fn claims(&self, token: &str) -> Option<TokenClaims> {
        self.decode(token).ok()
    }

    /// Verify a token of either kind and return its claims.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                let err = match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidAlgorithm
                    | ErrorKind::InvalidAlgorithmName
                    | ErrorKind::MissingAlgorithm => TokenError::Unsupported,
                    _ => TokenError::Malformed,
                };
                tracing::debug!(error = %e, reason = err.as_str(), "Token validation failed");
                err
            },
        )?;

        if data.claims.kind().is_none() {
            tracing::debug!(
                token_type = ?data.claims.token_type,
                reason = "unsupported",
                "Token validation failed"
            );
            return Err(TokenError::Unsupported);
        }

        Ok(data.claims)
    }

    /// Verify a token and require it to be of the given kind.
    pub fn decode_kind(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind() != Some(kind) {
            tracing::debug!(
                expected = ?kind,
                actual = ?claims.kind(),
                reason = "unsupported",
                "Token presented for the wrong purpose"
            );
            return Err(TokenError::Unsupported);
        }
        Ok(claims)
    }

    fn access_claims(&self, principal: &Principal, now: u64) -> TokenClaims {
        TokenClaims {
            sub: principal.username.clone(),
            user_id: principal.user_id,
            email: Some(principal.email.clone()),
            company_id: Some(principal.tenant_id),
            company_name: Some(principal.tenant_name.clone()),
            roles: principal.authorities.iter().cloned().collect(),
            token_type: None,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.access_ttl_secs,
            extra: HashMap::new(),
        }
    }

    fn refresh_claims(&self, principal: &Principal, now: u64) -> TokenClaims {
        TokenClaims {
            sub: principal.username.clone(),
            user_id: principal.user_id,
            email: None,
            company_id: None,
            company_name: None,
            roles: Vec::new(),
            token_type: Some("refresh".to_string()),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.refresh_ttl_secs,
            extra: HashMap::new(),
        }
    }

    pub(crate) fn encode_claims(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Access token whose `iat` is shifted by `offset_secs` (negative = past).
    #[cfg(test)]
    pub(crate) fn issue_access_token_at(
        &self,
        principal: &Principal,
        offset_secs: i64,
    ) -> Result<String, TokenError> {
        let now = now_secs().saturating_add_signed(offset_secs);
        self.encode_claims(&self.access_claims(principal, now))
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
