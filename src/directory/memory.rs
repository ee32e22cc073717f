use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    DirectoryError, DirectoryResult, PrincipalDirectory, PrincipalRecord, TenantDirectory,
    TenantRecord, is_argon2_hash,
};
use crate::config::DirectoryConfig;

/// Directory held in memory, built once from configuration.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    tenants: HashMap<Uuid, TenantRecord>,
    subdomains: HashMap<String, Uuid>,
    users: HashMap<Uuid, PrincipalRecord>,
    usernames: HashMap<String, Uuid>,
}

impl InMemoryDirectory {
    pub fn from_config(config: &DirectoryConfig) -> DirectoryResult<Self> {
        let mut dir = Self::default();

        for seed in &config.tenants {
            dir.insert_tenant(TenantRecord {
                id: seed.id,
                name: seed.name.clone(),
                subdomain: seed.subdomain.clone(),
                status: seed.status,
            });
        }

        for seed in &config.users {
            if !is_argon2_hash(&seed.password_hash) {
                return Err(DirectoryError::Internal(format!(
                    "user '{}' has an invalid password hash",
                    seed.username
                )));
            }

            dir.insert_user(PrincipalRecord {
                id: seed.id,
                username: seed.username.clone(),
                display_name: seed
                    .display_name
                    .clone()
                    .unwrap_or_else(|| seed.username.clone()),
                email: seed.email.clone(),
                tenant_id: seed.tenant_id,
                roles: seed.roles.clone(),
                disabled: seed.disabled,
                locked: seed.locked,
                password_hash: seed.password_hash.clone(),
            });
        }

        tracing::debug!(
            tenants = dir.tenants.len(),
            users = dir.users.len(),
            "Loaded in-memory directory"
        );
        Ok(dir)
    }

    pub fn insert_tenant(&mut self, tenant: TenantRecord) {
        if let Some(sub) = &tenant.subdomain {
            self.subdomains.insert(sub.to_ascii_lowercase(), tenant.id);
        }
        self.tenants.insert(tenant.id, tenant);
    }

    pub fn insert_user(&mut self, user: PrincipalRecord) {
        self.usernames.insert(user.username.to_lowercase(), user.id);
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryDirectory {
    async fn find_by_username(&self, username: &str) -> DirectoryResult<Option<PrincipalRecord>> {
        Ok(self
            .usernames
            .get(&username.to_lowercase())
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<PrincipalRecord>> {
        Ok(self.users.get(&id).cloned())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryDirectory {
    async fn find_by_id(&self, id: Uuid) -> DirectoryResult<Option<TenantRecord>> {
        Ok(self.tenants.get(&id).cloned())
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> DirectoryResult<Option<TenantRecord>> {
        Ok(self
            .subdomains
            .get(&subdomain.to_ascii_lowercase())
            .and_then(|id| self.tenants.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{TenantSeed, UserSeed},
        directory::{TenantStatus, hash_password},
    };

    fn config() -> DirectoryConfig {
        let acme = Uuid::from_u128(1);
        DirectoryConfig {
            tenants: vec![TenantSeed {
                id: acme,
                name: "Acme".into(),
                subdomain: Some("Acme".into()),
                status: TenantStatus::Active,
            }],
            users: vec![UserSeed {
                id: Uuid::from_u128(10),
                username: "Alice".into(),
                display_name: None,
                email: "alice@acme.test".into(),
                tenant_id: acme,
                password_hash: hash_password("correct horse").unwrap(),
                roles: vec!["ROLE_USER".into()],
                disabled: false,
                locked: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_lookups_are_case_insensitive() {
        let dir = InMemoryDirectory::from_config(&config()).unwrap();

        let user = PrincipalDirectory::find_by_username(&dir, "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.display_name, "Alice");

        let tenant = dir.find_by_subdomain("ACME").await.unwrap().unwrap();
        assert_eq!(tenant.name, "Acme");
        assert!(dir.find_by_subdomain("globex").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_password_verification() {
        let dir = InMemoryDirectory::from_config(&config()).unwrap();
        let user = PrincipalDirectory::find_by_id(&dir, Uuid::from_u128(10))
            .await
            .unwrap()
            .unwrap();
        assert!(user.verify_password("correct horse"));
        assert!(!user.verify_password("Correct horse"));
        assert!(!user.verify_password(""));
    }

    #[test]
    fn test_bad_hash_rejected() {
        let mut cfg = config();
        cfg.users[0].password_hash = "abcd".into();
        assert!(InMemoryDirectory::from_config(&cfg).is_err());
    }
}
