//! Users, principals and the external collaborator traits.
//!
//! Users are created and managed outside the board core; this module
//! defines the read-only view the core consumes plus the two
//! collaborator seams every deployment must provide: a directory to
//! look users up in and a verifier that turns bearer credentials into
//! principals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BoardResult;
use crate::id::UserId;

/// Authorisation role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular board member.
    #[default]
    Member,
    /// May archive/delete any task and prune the activity log.
    Admin,
}

/// Read-only view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable unique identifier.
    pub id: UserId,
    /// Name shown on the board.
    pub display_name: String,
    /// Role.
    #[serde(default)]
    pub role: Role,
    /// Inactive users cannot be assigned tasks.
    pub is_active: bool,
}

/// The authenticated identity behind one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// The canonical user.
    pub user_id: UserId,
    /// Role at authentication time.
    pub role: Role,
}

impl Principal {
    /// Whether this principal may act on a task owned by `created_by`.
    /// Archive/delete demand creator or admin.
    #[must_use]
    pub fn may_remove(&self, created_by: UserId) -> bool {
        self.role == Role::Admin || self.user_id == created_by
    }

    /// Whether this principal holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Directory of users, consumed read-only.
///
/// Deployments back this with whatever user store they run; tests and
/// the dev server use the in-memory directory from `trellis-storage`.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look a user up by id. `None` when unknown.
    async fn get(&self, id: UserId) -> BoardResult<Option<User>>;

    /// All users with `is_active = true`.
    async fn list_active(&self) -> BoardResult<Vec<User>>;
}

/// Turns a bearer credential into a principal at handshake.
///
/// The only suspension point that blocks connection acceptance.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify a token. Failure closes the connection with reason
    /// `unauthenticated`.
    async fn verify(&self, token: &str) -> BoardResult<Principal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_remove_anything() {
        let admin = Principal {
            user_id: UserId::new(),
            role: Role::Admin,
        };
        assert!(admin.may_remove(UserId::new()));
    }

    #[test]
    fn member_may_remove_only_own() {
        let me = UserId::new();
        let member = Principal {
            user_id: me,
            role: Role::Member,
        };
        assert!(member.may_remove(me));
        assert!(!member.may_remove(UserId::new()));
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(serde_json::to_string(&Role::Member).unwrap(), "\"member\"");
    }
}
