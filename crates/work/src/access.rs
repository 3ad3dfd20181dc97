//! Access control.
//!
//! Services ask an [`AccessPolicy`] for a [`Capability`] before touching
//! storage. Identity is established elsewhere; services only see the
//! resulting [`Actor`].

use serde::{Deserialize, Serialize};
use tasktree_core::{User, UserId, UserType};

use crate::error::{Result, WorkError};

/// The authenticated user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User ID
    pub user_id: UserId,
    /// Role
    pub user_type: UserType,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            user_type: user.user_type,
        }
    }
}

/// What an operation needs to be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Create user accounts
    ManageUsers,
    /// Create, update or delete projects
    ManageProjects,
    /// Create and mutate tasks
    EditTasks,
    /// Read tasks and projects
    View,
}

impl Capability {
    /// Name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageUsers => "manage users",
            Capability::ManageProjects => "manage projects",
            Capability::EditTasks => "edit tasks",
            Capability::View => "view",
        }
    }
}

/// Decides whether an actor holds a capability.
pub trait AccessPolicy: Send + Sync {
    /// Return `Ok(())` when `actor` may exercise `capability`.
    ///
    /// `actor` is `None` for anonymous callers (e.g. bootstrapping the first
    /// user).
    fn authorize(&self, actor: Option<&Actor>, capability: Capability) -> Result<()>;
}

/// Admits every caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _actor: Option<&Actor>, _capability: Capability) -> Result<()> {
        Ok(())
    }
}

/// Role-based rules: admins manage users, admins and project managers
/// manage projects, any signed-in user works on tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl AccessPolicy for RolePolicy {
    fn authorize(&self, actor: Option<&Actor>, capability: Capability) -> Result<()> {
        let Some(actor) = actor else {
            return Err(WorkError::Forbidden("authentication required".to_string()));
        };

        let allowed = match capability {
            Capability::ManageUsers => actor.user_type == UserType::Admin,
            Capability::ManageProjects => {
                matches!(actor.user_type, UserType::Admin | UserType::Pm)
            }
            Capability::EditTasks | Capability::View => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(WorkError::Forbidden(format!(
                "{} users may not {}",
                actor.user_type,
                capability.as_str()
            )))
        }
    }
}
