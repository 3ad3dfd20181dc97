//! JSON file storage implementation.
//!
//! Stores each entity as a JSON file under a data directory and keeps small
//! per-object meta markers (version + updated_at) next to them.

use std::path::{Path, PathBuf};
use tasktree_core::{Project, ProjectId, Task, TaskFilter, TaskId, User, UserId};
use tokio::fs;
use tracing::{debug, warn};
use super::{Storage, StorageError, Result};

/// File-based JSON storage backend.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Open storage rooted at `root`, creating the entity and meta
    /// directories if they do not exist yet.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for kind in ["tasks", "projects", "users"] {
            fs::create_dir_all(root.join(kind)).await?;
            fs::create_dir_all(root.join("meta").join(kind)).await?;
        }

        debug!("Opened JSON storage at {}", root.display());
        Ok(Self { root })
    }

    fn task_path(&self, id: TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{}.json", id))
    }
    fn project_path(&self, id: ProjectId) -> PathBuf {
        self.root.join("projects").join(format!("{}.json", id))
    }
    fn user_path(&self, id: UserId) -> PathBuf {
        self.root.join("users").join(format!("{}.json", id))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let path = self.meta_path(kind, id);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_atomic(&path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }

    /// Version marker of an object, 0 if it was never written.
    pub async fn version(&self, kind: &str, id: &str) -> Result<u64> {
        match read_json::<serde_json::Value>(&self.meta_path(kind, id)).await? {
            Some(meta) => Ok(meta.get("version").and_then(|v| v.as_u64()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn write_entity<T: serde::Serialize>(
        &self,
        path: &Path,
        kind: &str,
        id: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        write_atomic(path, json.as_bytes()).await?;
        self.bump_version(kind, id).await?;
        Ok(())
    }

    async fn remove_entity(&self, path: &Path, kind: &str, id: &str) -> Result<()> {
        remove_if_exists(path).await?;
        remove_if_exists(&self.meta_path(kind, id)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    async fn save_task(&self, task: &Task) -> Result<()> {
        let id = task.id.to_string();
        self.write_entity(&self.task_path(task.id), "tasks", &id, task).await
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        read_json(&self.task_path(id)).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = list_dir(&self.root.join("tasks"))
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.remove_entity(&self.task_path(id), "tasks", &id.to_string()).await
    }

    async fn update_progress(&self, id: TaskId, progress: u8) -> Result<()> {
        let Some(mut task) = self.load_task(id).await? else {
            return Err(StorageError::NotFound(format!("task {}", id)));
        };
        task.progress = progress;
        task.updated_at = chrono::Utc::now();
        self.save_task(&task).await
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        let id = project.id.to_string();
        self.write_entity(&self.project_path(project.id), "projects", &id, project).await
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        read_json(&self.project_path(id)).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = list_dir(&self.root.join("projects")).await?;
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(projects)
    }

    async fn delete_project(&self, id: ProjectId) -> Result<()> {
        self.remove_entity(&self.project_path(id), "projects", &id.to_string()).await
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let id = user.id.to_string();
        self.write_entity(&self.user_path(user.id), "users", &id, user).await
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>> {
        read_json(&self.user_path(id)).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.list_users().await?.into_iter().find(|u| u.email == email))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = list_dir(&self.root.join("users")).await?;
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
        }
    }
    Ok(items)
}

/// Write to a sibling `.tmp` file, then rename over `path`, so readers see
/// either the old or the new content.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
