//! User service.

use std::sync::Arc;

use tasktree_core::{User, UserId, UserType};
use tasktree_storage::Storage;
use tracing::info;

use crate::access::{AccessPolicy, Actor, AllowAll, Capability};
use crate::error::{Result, WorkError};

/// Specification for creating a user.
#[derive(Debug, Clone, Default)]
pub struct UserSpec {
    /// Display name
    pub name: String,
    /// Login email, unique across users
    pub email: String,
    /// Hash produced by the caller's hasher; stored as-is
    pub password_hash: String,
    /// Role, defaults to member
    pub user_type: Option<UserType>,
}

/// Creates and looks up users.
pub struct UserManager<S: Storage> {
    storage: Arc<S>,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Storage> UserManager<S> {
    /// Create a new user manager.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            policy: Arc::new(AllowAll),
        }
    }

    /// Set the access policy.
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Register a user. `actor` is `None` when nobody is signed in yet.
    pub async fn create_user(&self, actor: Option<&Actor>, spec: UserSpec) -> Result<User> {
        self.policy.authorize(actor, Capability::ManageUsers)?;

        let name = spec.name.trim();
        if name.is_empty() {
            return Err(WorkError::InvalidInput("name is required".to_string()));
        }
        let email = normalize_email(&spec.email)?;

        if self.storage.find_user_by_email(&email).await?.is_some() {
            return Err(WorkError::InvalidInput("user already exists".to_string()));
        }

        let now = chrono::Utc::now();
        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            email,
            password_hash: spec.password_hash,
            user_type: spec.user_type.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        self.storage.save_user(&user).await?;
        info!("Created {} user {}", user.user_type, user.id);
        Ok(user)
    }

    /// Load a user.
    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.storage
            .load_user(id)
            .await?
            .ok_or_else(|| WorkError::not_found("user", id))
    }

    /// All users, oldest first.
    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<User>> {
        self.policy.authorize(Some(actor), Capability::View)?;
        Ok(self.storage.list_users().await?)
    }

    /// Resolve the [`Actor`] for a known user.
    pub async fn actor_for(&self, id: UserId) -> Result<Actor> {
        let user = self.get_user(id).await?;
        Ok(Actor::from(&user))
    }
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(WorkError::InvalidInput(format!("invalid email: '{}'", raw)))
    }
}
