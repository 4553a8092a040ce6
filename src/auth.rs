use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Result};
use crate::models::Role;

/// Authenticated caller as asserted by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            log::warn!("Denied admin operation for {}", self.uid);
            Err(JournalError::Unauthorized(format!(
                "{} is not an administrator",
                self.email
            )))
        }
    }
}

/// Delegated authentication: turns a session token into a principal.
/// Roles come from the provider's claims, never from a shared secret.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal>;
}

/// Token table used in local demo mode and tests
#[derive(Default)]
pub struct StaticIdentityProvider {
    sessions: RwLock<HashMap<String, Principal>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, principal: Principal) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| JournalError::Unavailable(e.to_string()))?;
        sessions.insert(token.to_string(), principal);
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| JournalError::Unavailable(e.to_string()))?;
        sessions.remove(token);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, token: &str) -> Result<Principal> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| JournalError::Unavailable(e.to_string()))?;
        sessions
            .get(token)
            .cloned()
            .ok_or_else(|| JournalError::Unauthorized("Invalid or expired session".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            uid: "uid-1".to_string(),
            email: "trader@example.com".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn test_verify_known_and_unknown_tokens() {
        let provider = StaticIdentityProvider::new();
        provider.insert("token-1", principal(Role::User)).unwrap();

        let verified = provider.verify("token-1").await.unwrap();
        assert_eq!(verified.uid, "uid-1");

        let err = provider.verify("token-2").await.unwrap_err();
        assert!(matches!(err, JournalError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_revoked_token_is_rejected() {
        let provider = StaticIdentityProvider::new();
        provider.insert("token-1", principal(Role::Admin)).unwrap();
        provider.revoke("token-1").unwrap();
        assert!(provider.verify("token-1").await.is_err());
    }

    #[test]
    fn test_require_admin() {
        assert!(principal(Role::Admin).require_admin().is_ok());
        assert!(matches!(
            principal(Role::User).require_admin(),
            Err(JournalError::Unauthorized(_))
        ));
    }
}
