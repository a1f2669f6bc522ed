//! In-memory user directory and credential verifier.
//!
//! Users are created and managed outside the core; these
//! implementations exist for tests and the self-contained dev server,
//! where the directory is seeded at startup.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Duration;

use trellis_core::{
    BoardError, BoardResult, CredentialVerifier, Principal, Timestamp, User, UserDirectory, UserId,
};

use crate::error::StorageError;

/// In-memory read-only user directory.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user. Overwrites any previous entry with the same id.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn seed(&self, user: User) -> Result<(), StorageError> {
        self.users
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(user.id, user);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get(&self, id: UserId) -> BoardResult<Option<User>> {
        let users = self
            .users
            .read()
            .map_err(|e| BoardError::Internal(e.to_string()))?;
        Ok(users.get(&id).cloned())
    }

    async fn list_active(&self) -> BoardResult<Vec<User>> {
        let users = self
            .users
            .read()
            .map_err(|e| BoardError::Internal(e.to_string()))?;
        Ok(users.values().filter(|u| u.is_active).cloned().collect())
    }
}

/// Token verifier backed by a static table of issued tokens.
///
/// Each token carries its issue instant; tokens older than the
/// configured TTL are rejected as if unknown.
#[derive(Debug)]
pub struct StaticCredentialVerifier {
    tokens: RwLock<HashMap<String, (Principal, Timestamp)>>,
    ttl: Duration,
}

impl StaticCredentialVerifier {
    /// Create a verifier whose tokens expire after `ttl_secs` seconds.
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
        }
    }

    /// Issue a token for a principal, valid from now.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn issue(&self, token: impl Into<String>, principal: Principal) -> BoardResult<()> {
        self.tokens
            .write()
            .map_err(|e| BoardError::Internal(e.to_string()))?
            .insert(token.into(), (principal, Timestamp::now()));
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, token: &str) -> BoardResult<Principal> {
        let tokens = self
            .tokens
            .read()
            .map_err(|e| BoardError::Internal(e.to_string()))?;
        match tokens.get(token) {
            Some((principal, issued_at)) if Timestamp::now().0 - issued_at.0 <= self.ttl => {
                Ok(*principal)
            },
            Some(_) => Err(BoardError::Unauthenticated {
                reason: "token expired".to_string(),
            }),
            None => Err(BoardError::Unauthenticated {
                reason: "unknown token".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Role;

    fn user(active: bool) -> User {
        User {
            id: UserId::new(),
            display_name: "dev".to_string(),
            role: Role::Member,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn directory_lists_only_active() {
        let dir = MemoryUserDirectory::new();
        dir.seed(user(true)).unwrap();
        dir.seed(user(false)).unwrap();
        assert_eq!(dir.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verifier_accepts_fresh_and_rejects_unknown() {
        let verifier = StaticCredentialVerifier::new(3600);
        let principal = Principal {
            user_id: UserId::new(),
            role: Role::Member,
        };
        verifier.issue("tok-1", principal).unwrap();

        assert_eq!(verifier.verify("tok-1").await.unwrap(), principal);
        assert!(matches!(
            verifier.verify("tok-2").await,
            Err(BoardError::Unauthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn verifier_rejects_expired() {
        let verifier = StaticCredentialVerifier::new(0);
        let principal = Principal {
            user_id: UserId::new(),
            role: Role::Member,
        };
        verifier.issue("tok", principal).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(matches!(
            verifier.verify("tok").await,
            Err(BoardError::Unauthenticated { .. })
        ));
    }
}
