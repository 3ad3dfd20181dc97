//! Project model - the container a task tree lives in.

use serde::{Deserialize, Serialize};
use crate::error::ParseError;
use crate::id::{ProjectId, UserId};
use crate::Time;

/// A project groups the task trees of one piece of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: ProjectId,

    /// Project title
    pub title: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Planned start
    pub start_date: Option<Time>,

    /// Planned end
    pub end_date: Option<Time>,

    /// Project status
    #[serde(default)]
    pub status: ProjectStatus,

    /// Creator; the only user allowed to update or delete the project
    pub created_by: UserId,

    /// When created
    pub created_at: Time,

    /// Last updated
    pub updated_at: Time,
}

impl Project {
    /// Create a project owned by `created_by`.
    pub fn new(title: impl Into<String>, created_by: UserId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ProjectId::new(),
            title: title.into(),
            description: String::new(),
            start_date: None,
            end_date: None,
            status: ProjectStatus::default(),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Not started yet
    Planning,
    /// Under way
    Active,
    /// Paused
    #[serde(rename = "On Hold")]
    OnHold,
    /// Finished
    Completed,
}

impl ProjectStatus {
    /// Display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "Planning",
            ProjectStatus::Active => "Active",
            ProjectStatus::OnHold => "On Hold",
            ProjectStatus::Completed => "Completed",
        }
    }
}

impl Default for ProjectStatus {
    fn default() -> Self {
        ProjectStatus::Planning
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "planning" => Ok(ProjectStatus::Planning),
            "active" => Ok(ProjectStatus::Active),
            "onhold" => Ok(ProjectStatus::OnHold),
            "completed" | "done" => Ok(ProjectStatus::Completed),
            _ => Err(ParseError::new("project status", s)),
        }
    }
}
