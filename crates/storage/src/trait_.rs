//! Storage trait abstraction.

use async_trait::async_trait;
use tasktree_core::{Project, ProjectId, Task, TaskFilter, TaskId, User, UserId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Storage abstraction for tasktree data.
///
/// Backends are shared between concurrent callers, so every operation takes
/// `&self`. Writes are last-write-wins; nothing here serializes a
/// read-modify-write sequence spanning several calls.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Task operations ===

    /// Save a task (create or replace).
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Load a task by ID.
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// List tasks matching the filter, oldest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Delete a task. Deleting a missing task is not an error.
    async fn delete_task(&self, id: TaskId) -> Result<()>;

    /// Overwrite a task's progress without touching its history.
    ///
    /// Fails with [`StorageError::NotFound`] when the task does not exist.
    async fn update_progress(&self, id: TaskId, progress: u8) -> Result<()>;

    /// Direct children of `parent`, oldest first.
    async fn find_children(&self, parent: TaskId) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter::children_of(parent)).await
    }

    /// Number of direct children of `parent`.
    async fn count_children(&self, parent: TaskId) -> Result<usize> {
        Ok(self.find_children(parent).await?.len())
    }

    // === Project operations ===

    /// Save a project (create or replace).
    async fn save_project(&self, project: &Project) -> Result<()>;

    /// Load a project by ID.
    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>>;

    /// List all projects, oldest first.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Delete a project. Its tasks are left untouched.
    async fn delete_project(&self, id: ProjectId) -> Result<()>;

    // === User operations ===

    /// Save a user (create or replace).
    async fn save_user(&self, user: &User) -> Result<()>;

    /// Load a user by ID.
    async fn load_user(&self, id: UserId) -> Result<Option<User>>;

    /// Find a user by email (exact match).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// List all users, oldest first.
    async fn list_users(&self) -> Result<Vec<User>>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn save_task(&self, task: &Task) -> Result<()> {
        (**self).save_task(task).await
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        (**self).load_task(id).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        (**self).list_tasks(filter).await
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        (**self).delete_task(id).await
    }

    async fn update_progress(&self, id: TaskId, progress: u8) -> Result<()> {
        (**self).update_progress(id, progress).await
    }

    async fn find_children(&self, parent: TaskId) -> Result<Vec<Task>> {
        (**self).find_children(parent).await
    }

    async fn count_children(&self, parent: TaskId) -> Result<usize> {
        (**self).count_children(parent).await
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        (**self).save_project(project).await
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        (**self).load_project(id).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        (**self).list_projects().await
    }

    async fn delete_project(&self, id: ProjectId) -> Result<()> {
        (**self).delete_project(id).await
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        (**self).save_user(user).await
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>> {
        (**self).load_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        (**self).find_user_by_email(email).await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        (**self).list_users().await
    }
}
