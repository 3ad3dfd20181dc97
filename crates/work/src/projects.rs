//! Project service.

use std::collections::HashSet;
use std::sync::Arc;

use tasktree_core::{Project, ProjectId, ProjectStatus, TaskFilter, Time};
use tasktree_storage::Storage;
use tracing::info;

use crate::access::{AccessPolicy, Actor, AllowAll, Capability};
use crate::error::{Result, WorkError};

/// Specification for creating a project.
#[derive(Debug, Clone, Default)]
pub struct ProjectSpec {
    /// Project title
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Planned start
    pub start_date: Option<Time>,
    /// Planned end, not before the start
    pub end_date: Option<Time>,
    /// Initial status, defaults to Planning
    pub status: Option<ProjectStatus>,
}

/// Field changes for [`ProjectManager::update_project`].
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<Time>,
    pub end_date: Option<Time>,
    pub status: Option<ProjectStatus>,
}

/// Creates, lists and edits projects.
pub struct ProjectManager<S: Storage> {
    storage: Arc<S>,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Storage> ProjectManager<S> {
    /// Create a new project manager.
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

    /// Create a project owned by `actor`.
    pub async fn create_project(&self, actor: &Actor, spec: ProjectSpec) -> Result<Project> {
        self.policy.authorize(Some(actor), Capability::ManageProjects)?;

        let title = spec.title.trim();
        if title.is_empty() {
            return Err(WorkError::InvalidInput("title is required".to_string()));
        }
        check_dates(spec.start_date, spec.end_date)?;

        let mut project = Project::new(title, actor.user_id);
        project.description = spec.description;
        project.start_date = spec.start_date;
        project.end_date = spec.end_date;
        project.status = spec.status.unwrap_or_default();

        self.storage.save_project(&project).await?;
        info!("Created project {} ({})", project.id, project.title);
        Ok(project)
    }

    /// Load a project.
    pub async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.storage
            .load_project(id)
            .await?
            .ok_or_else(|| WorkError::not_found("project", id))
    }

    /// Projects `actor` created, plus projects holding tasks `actor` created
    /// or is assigned to.
    pub async fn list_projects(&self, actor: &Actor) -> Result<Vec<Project>> {
        self.policy.authorize(Some(actor), Capability::View)?;

        let involved = self
            .storage
            .list_tasks(&TaskFilter {
                involving: Some(actor.user_id),
                ..Default::default()
            })
            .await?;
        let task_projects: HashSet<ProjectId> = involved.iter().map(|t| t.project_id).collect();

        let projects = self
            .storage
            .list_projects()
            .await?
            .into_iter()
            .filter(|p| p.created_by == actor.user_id || task_projects.contains(&p.id))
            .collect();
        Ok(projects)
    }

    /// Edit a project. Only its creator may do so.
    pub async fn update_project(
        &self,
        actor: &Actor,
        id: ProjectId,
        changes: ProjectChanges,
    ) -> Result<Project> {
        self.policy.authorize(Some(actor), Capability::ManageProjects)?;
        let mut project = self.owned(actor, id, "update").await?;

        if let Some(title) = changes.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(WorkError::InvalidInput("title is required".to_string()));
            }
            project.title = title.to_string();
        }
        if let Some(description) = changes.description {
            project.description = description;
        }
        if let Some(start) = changes.start_date {
            project.start_date = Some(start);
        }
        if let Some(end) = changes.end_date {
            project.end_date = Some(end);
        }
        if let Some(status) = changes.status {
            project.status = status;
        }
        check_dates(project.start_date, project.end_date)?;
        project.updated_at = chrono::Utc::now();

        self.storage.save_project(&project).await?;
        info!("Updated project {}", id);
        Ok(project)
    }

    /// Delete a project. Only its creator may do so; its tasks stay.
    pub async fn delete_project(&self, actor: &Actor, id: ProjectId) -> Result<()> {
        self.policy.authorize(Some(actor), Capability::ManageProjects)?;
        self.owned(actor, id, "delete").await?;

        self.storage.delete_project(id).await?;
        info!("Deleted project {}", id);
        Ok(())
    }

    async fn owned(&self, actor: &Actor, id: ProjectId, action: &str) -> Result<Project> {
        let project = self.get_project(id).await?;
        if project.created_by != actor.user_id {
            return Err(WorkError::Forbidden(format!(
                "not authorized to {} project {}",
                action, id
            )));
        }
        Ok(project)
    }
}

fn check_dates(start: Option<Time>, end: Option<Time>) -> Result<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(WorkError::InvalidInput(
            "end date must not be before start date".to_string(),
        )),
        _ => Ok(()),
    }
}
