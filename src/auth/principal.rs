//! The authenticated actor of a request.
//!
//! A [`Principal`] is attached as a request extension by the authentication
//! stage and is read-only afterwards. Its tenant is the only tenant the
//! principal may ever act on; the tenant validator enforces that.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token::TokenClaims;
use crate::directory::PrincipalRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    /// Login name; the `sub` claim of issued tokens.
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub authorities: BTreeSet<String>,
}

impl Principal {
    pub fn from_record(record: PrincipalRecord, tenant_name: String) -> Self {
        Self {
            user_id: record.id,
            username: record.username,
            display_name: record.display_name,
            email: record.email,
            tenant_id: record.tenant_id,
            tenant_name,
            authorities: record.roles.into_iter().collect(),
        }
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    pub fn has_any_authority<S: AsRef<str>>(&self, authorities: &[S]) -> bool {
        authorities.iter().any(|a| self.has_authority(a.as_ref()))
    }
}

/// Claims of the bearer token that authenticated the request.
#[derive(Debug, Clone)]
pub struct VerifiedClaims(pub TokenClaims);

/// How the authentication stage disposed of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// No credential, or one that failed verification.
    Anonymous,
    /// The token verified but is past its expiry; the client should refresh.
    TokenExpired,
    /// The token verified but the account is unknown, disabled or locked.
    AccountRejected,
}

impl AuthOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthOutcome::Authenticated => "authenticated",
            AuthOutcome::Anonymous => "anonymous",
            AuthOutcome::TokenExpired => "token-expired",
            AuthOutcome::AccountRejected => "account-rejected",
        }
    }
}
