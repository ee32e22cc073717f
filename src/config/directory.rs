use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConfigError;
use crate::directory::{TenantStatus, is_argon2_hash};

/// Seed data for the in-memory principal and tenant directory.
///
/// Deployments with a real user store implement the directory traits
/// themselves; this section exists so the service runs stand-alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,

    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantSeed {
    pub id: Uuid,
    pub name: String,
    /// Subdomain label routed to this tenant (e.g. `acme`).
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub status: TenantStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSeed {
    pub id: Uuid,
    /// Login name.
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub email: String,
    pub tenant_id: Uuid,
    /// Argon2 password hash in PHC string format, as printed by
    /// `tenantgate hash-password`.
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub locked: bool,
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut tenant_ids = HashSet::new();
        let mut subdomains = HashSet::new();
        for tenant in &self.tenants {
            if !tenant_ids.insert(tenant.id) {
                return Err(ConfigError::Validation(format!(
                    "directory: duplicate tenant id {}",
                    tenant.id
                )));
            }
            if let Some(sub) = &tenant.subdomain
                && !subdomains.insert(sub.to_ascii_lowercase())
            {
                return Err(ConfigError::Validation(format!(
                    "directory: subdomain '{sub}' is mapped to more than one tenant"
                )));
            }
        }

        let mut usernames = HashSet::new();
        for user in &self.users {
            if !tenant_ids.contains(&user.tenant_id) {
                return Err(ConfigError::Validation(format!(
                    "directory: user '{}' references unknown tenant {}",
                    user.username, user.tenant_id
                )));
            }
            if !usernames.insert(user.username.to_ascii_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "directory: duplicate username '{}'",
                    user.username
                )));
            }
            if !is_argon2_hash(&user.password_hash) {
                return Err(ConfigError::Validation(format!(
                    "directory: user '{}' password_hash must be an Argon2 PHC string",
                    user.username
                )));
            }
        }
        Ok(())
    }
}
