//! Identity Provider - Read-only role resolution for workflow participants
//!
//! Freelancer and reviewer eligibility checks go through this collaborator.
//! Lookups are read-only and need no synchronization with job mutations.

use crate::WorkflowResult;
use crate::error::WorkflowError;
use crate::models::Role;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// External identity collaborator resolving user roles
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the role a user holds, or `NotFound` if the user is unknown
    async fn resolve_role(&self, user_id: Uuid) -> WorkflowResult<Role>;
}

/// In-memory identity provider for tests and embedders
pub struct InMemoryIdentityProvider {
    roles: Arc<RwLock<HashMap<Uuid, Role>>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            roles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a user with a role, returning the new user id
    pub async fn register(&self, role: Role) -> Uuid {
        let user_id = Uuid::new_v4();
        self.roles.write().await.insert(user_id, role);
        user_id
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn resolve_role(&self, user_id: Uuid) -> WorkflowResult<Role> {
        self.roles
            .read()
            .await
            .get(&user_id)
            .copied()
            .ok_or_else(|| WorkflowError::not_found(format!("user {}", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_registered_role() {
        let identity = InMemoryIdentityProvider::new();
        let reviewer = identity.register(Role::Reviewer).await;

        assert_eq!(identity.resolve_role(reviewer).await.unwrap(), Role::Reviewer);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let identity = InMemoryIdentityProvider::new();
        let result = identity.resolve_role(Uuid::new_v4()).await;
        assert!(matches!(result, Err(WorkflowError::NotFound(_))));
    }
}
