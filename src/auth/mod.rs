use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::user::{Actor, User};
use crate::store::{ns, StoreService};

/// Role-index record at `roles/{user_id}`: one lookup resolves an
/// account to its role instead of probing each role collection in turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role: Actor,
    pub name: String,
}

/// Collaborator boundary: exchanges credentials for an opaque
/// authenticated user id, which the core trusts for authorization.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, user_id: &str, secret: &str) -> Result<String, CoreError>;
}

/// Development provider that trusts the declared id. Production wires
/// the managed identity service behind the same trait.
pub struct TrustedIdentityProvider;

#[async_trait]
impl IdentityProvider for TrustedIdentityProvider {
    async fn authenticate(&self, user_id: &str, _secret: &str) -> Result<String, CoreError> {
        if user_id.trim().is_empty() {
            return Err(CoreError::BadRequest("user id cannot be empty".to_string()));
        }
        Ok(user_id.to_string())
    }
}

pub async fn resolve_user(store: &StoreService, user_id: &str) -> Result<User, CoreError> {
    let Some(found) = store.get::<RoleRecord>(ns::ROLES, user_id).await? else {
        return Err(CoreError::NotFound(format!("user {user_id}")));
    };

    let RoleRecord { role, name } = found.value;
    let id = user_id.to_string();
    Ok(match role {
        Actor::Customer => User::Customer { id, name },
        Actor::Restaurant => User::Restaurant { id, name },
        Actor::Driver => User::Driver { id, name },
        Actor::Admin => User::Admin { id, name },
    })
}
