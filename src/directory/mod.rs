//! Principal and tenant directory.
//!
//! The pipeline only reads from the directory: principal records back the
//! authentication stage and the login endpoint, tenant records back tenant
//! resolution and validation. Deployments with their own user store
//! implement the two traits; [`InMemoryDirectory`] serves configured seed
//! data.

mod memory;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryDirectory;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Disabled,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Suspended => "SUSPENDED",
            TenantStatus::Disabled => "DISABLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub name: String,
    pub subdomain: Option<String>,
    pub status: TenantStatus,
}

impl TenantRecord {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct PrincipalRecord {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub tenant_id: Uuid,
    pub roles: Vec<String>,
    pub disabled: bool,
    pub locked: bool,
    /// Argon2 hash of the password in PHC string format.
    pub password_hash: String,
}

impl PrincipalRecord {
    /// Whether the account may authenticate at all.
    pub fn is_usable(&self) -> bool {
        !self.disabled && !self.locked
    }

    /// Check a password against the stored hash. CPU-bound; async callers
    /// should run it on the blocking pool.
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password_hash(&self.password_hash, password)
    }
}

/// Hash compared against when no account matches a login name. It carries
/// the default Argon2id parameters so a miss costs the same as a hit.
pub const UNKNOWN_USER_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$dW5rbm93bi11c2VyLXNsdA$bm8tYWNjb3VudC1tYXRjaGVzLXRoaXMtaGFzaCEhISE";

pub fn verify_password_hash(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Argon2id hash of `password` with a fresh salt, in the PHC form seed users
/// are configured with.
pub fn hash_password(password: &str) -> DirectoryResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DirectoryError::Internal(format!("Password hashing failed: {e}")))
}

/// Whether `value` is a PHC string for one of the Argon2 variants.
pub fn is_argon2_hash(value: &str) -> bool {
    PasswordHash::new(value).is_ok_and(|hash| hash.algorithm.as_str().starts_with("argon2"))
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> DirectoryResult<Option<PrincipalRecord>>;
    async fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<PrincipalRecord>>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<TenantRecord>>;
    /// Case-insensitive lookup of a subdomain label.
    async fn find_by_subdomain(&self, subdomain: &str) -> DirectoryResult<Option<TenantRecord>>;
}
