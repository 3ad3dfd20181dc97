//! User model.

use serde::{Deserialize, Serialize};
use crate::error::ParseError;
use crate::id::UserId;
use crate::Time;

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: UserId,

    /// Display name
    pub name: String,

    /// Email address, unique across users
    pub email: String,

    /// Password hash produced by an external hasher; never shown
    pub password_hash: String,

    /// Role
    #[serde(default)]
    pub user_type: UserType,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Full access
    Admin,
    /// Project manager
    Pm,
    /// Regular member
    Member,
}

impl UserType {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::Pm => "pm",
            UserType::Member => "member",
        }
    }
}

impl Default for UserType {
    fn default() -> Self {
        UserType::Member
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(UserType::Admin),
            "pm" | "manager" => Ok(UserType::Pm),
            "member" | "user" => Ok(UserType::Member),
            _ => Err(ParseError::new("user type", s)),
        }
    }
}
