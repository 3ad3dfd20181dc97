//! SQLite storage backend for tasktree.
//!
//! Entities are stored as JSON documents, with the columns the engine queries
//! on (parent, project, email) pulled out and indexed.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tasktree_core::{Project, ProjectId, Task, TaskFilter, TaskId, Time, User, UserId};
use tracing::debug;

use super::trait_::{Storage, StorageError, Result};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `url`, e.g. `sqlite:./data/tasktree.db`.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        debug!("Opened SQLite storage at {}", url);

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is its own database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                project_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Deserialize the `data` column of each row.
    fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<SqliteRow>) -> Result<Vec<T>> {
        rows.iter()
            .map(|row| -> Result<T> {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    fn decode_row<T: serde::de::DeserializeOwned>(row: Option<SqliteRow>) -> Result<Option<T>> {
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(t: &Time) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
impl Storage for SqliteStorage {
    // === Task operations ===

    async fn save_task(&self, task: &Task) -> Result<()> {
        let data = serde_json::to_string(task)?;

        sqlx::query(
            "INSERT OR REPLACE INTO tasks (id, parent_id, project_id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.parent_task.map(|p| p.to_string()))
        .bind(task.project_id.to_string())
        .bind(data)
        .bind(timestamp(&task.created_at))
        .bind(timestamp(&task.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT data FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Self::decode_row(row)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows = match filter.project {
            Some(project) => {
                sqlx::query("SELECT data FROM tasks WHERE project_id = ? ORDER BY created_at, id")
                    .bind(project.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT data FROM tasks ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let tasks: Vec<Task> = Self::decode_rows(rows)?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_progress(&self, id: TaskId, progress: u8) -> Result<()> {
        let now = timestamp(&chrono::Utc::now());
        let result = sqlx::query(
            "UPDATE tasks
            SET data = json_set(data, '$.progress', ?, '$.updated_at', ?), updated_at = ?
            WHERE id = ?",
        )
        .bind(i64::from(progress))
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task {}", id)));
        }
        Ok(())
    }

    async fn find_children(&self, parent: TaskId) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT data FROM tasks WHERE parent_id = ? ORDER BY created_at, id")
            .bind(parent.to_string())
            .fetch_all(&self.pool)
            .await?;
        Self::decode_rows(rows)
    }

    async fn count_children(&self, parent: TaskId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE parent_id = ?")
            .bind(parent.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    // === Project operations ===

    async fn save_project(&self, project: &Project) -> Result<()> {
        let data = serde_json::to_string(project)?;

        sqlx::query(
            "INSERT OR REPLACE INTO projects (id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(data)
        .bind(timestamp(&project.created_at))
        .bind(timestamp(&project.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_project(&self, id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT data FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Self::decode_row(row)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT data FROM projects ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Self::decode_rows(rows)
    }

    async fn delete_project(&self, id: ProjectId) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === User operations ===

    async fn save_user(&self, user: &User) -> Result<()> {
        let data = serde_json::to_string(user)?;

        sqlx::query(
            "INSERT INTO users (id, email, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                data = excluded.data,
                updated_at = excluded.updated_at",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(data)
        .bind(timestamp(&user.created_at))
        .bind(timestamp(&user.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT data FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Self::decode_row(row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT data FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Self::decode_row(row)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT data FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Self::decode_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktree_core::UserType;

    fn create_test_task(title: &str) -> Task {
        Task::new(title, ProjectId::new(), UserId::new())
    }

    #[tokio::test]
    async fn test_task_operations() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let task = create_test_task("Test Task");

        storage.save_task(&task).await.unwrap();
        let loaded = storage.load_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, task.title);

        let tasks = storage.list_tasks(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);

        storage.delete_task(task.id).await.unwrap();
        assert!(storage.load_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_children_lookup() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let root = create_test_task("Root");
        let first = create_test_task("First").with_parent(&root);
        let mut second = create_test_task("Second").with_parent(&root);
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);

        storage.save_task(&root).await.unwrap();
        storage.save_task(&second).await.unwrap();
        storage.save_task(&first).await.unwrap();

        let children = storage.find_children(root.id).await.unwrap();
        let ids: Vec<TaskId> = children.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(storage.count_children(root.id).await.unwrap(), 2);
        assert_eq!(storage.count_children(first.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_progress() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let mut task = create_test_task("Parent");
        task.apply_delta(25, None, chrono::Utc::now());
        storage.save_task(&task).await.unwrap();

        storage.update_progress(task.id, 80).await.unwrap();
        let loaded = storage.load_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 80);
        assert_eq!(loaded.progress_history.len(), 1);

        let err = storage.update_progress(TaskId::new(), 10).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_user_by_email() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let now = chrono::Utc::now();
        let user = User {
            id: UserId::new(),
            name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            password_hash: "hash".to_string(),
            user_type: UserType::Admin,
            created_at: now,
            updated_at: now,
        };

        storage.save_user(&user).await.unwrap();
        let found = storage.find_user_by_email("grace@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(storage.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_user_keeps_other_users() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let now = chrono::Utc::now();
        let mut first = User {
            id: UserId::new(),
            name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            password_hash: "hash".to_string(),
            user_type: UserType::Member,
            created_at: now,
            updated_at: now,
        };
        storage.save_user(&first).await.unwrap();

        let clash = User { id: UserId::new(), name: "Other".to_string(), ..first.clone() };
        assert!(storage.save_user(&clash).await.is_err());
        assert!(storage.load_user(clash.id).await.unwrap().is_none());
        assert_eq!(storage.load_user(first.id).await.unwrap().unwrap().name, "Grace");

        first.user_type = UserType::Pm;
        storage.save_user(&first).await.unwrap();
        let users = storage.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_type, UserType::Pm);
    }

    #[tokio::test]
    async fn test_health_check() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(storage.health_check().await);
    }
}
