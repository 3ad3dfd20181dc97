//! Task management service.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tasktree_core::{Priority, ProjectId, Task, TaskFilter, TaskId, TaskStatus, Time, UserId};
use tasktree_progress::{RollupConfig, RollupEngine, RollupReport};
use tasktree_storage::Storage;
use tracing::{info, warn};

use crate::access::{AccessPolicy, Actor, AllowAll, Capability};
use crate::error::{Result, WorkError};

/// Task management service.
#[async_trait]
pub trait WorkManager: Send + Sync {
    /// Create a new task owned by `actor`.
    async fn create_task(&self, actor: &Actor, spec: TaskSpec) -> Result<Task>;

    /// Load a task.
    async fn get_task(&self, id: TaskId) -> Result<Task>;

    /// List tasks `actor` created or is assigned to, narrowed by `filter`.
    async fn list_tasks(&self, actor: &Actor, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Edit descriptive fields of a task.
    async fn update_task(&self, actor: &Actor, id: TaskId, changes: TaskChanges) -> Result<Task>;

    /// Delete a task. Its children keep their (now dangling) parent reference.
    async fn delete_task(&self, actor: &Actor, id: TaskId) -> Result<()>;

    /// Mark a leaf task as started.
    async fn start_task(&self, actor: &Actor, id: TaskId) -> Result<Task>;

    /// Shift a leaf task's progress by `delta` and roll the change up.
    async fn update_progress(
        &self,
        actor: &Actor,
        id: TaskId,
        delta: i32,
        note: Option<String>,
    ) -> Result<ProgressOutcome>;

    /// Complete a leaf task and roll the change up.
    async fn complete_task(&self, actor: &Actor, id: TaskId) -> Result<ProgressOutcome>;

    /// The subtree under `root`, depth-first, children oldest first.
    async fn task_tree(&self, root: TaskId) -> Result<Vec<TaskNode>>;
}

/// Specification for creating a task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Task title
    pub title: String,
    /// Free-form description
    pub description: String,
    /// Owning project, must exist
    pub project_id: ProjectId,
    /// Parent task, must exist
    pub parent_task: Option<TaskId>,
    /// Initial status
    pub status: Option<TaskStatus>,
    /// Priority
    pub priority: Option<Priority>,
    /// Due date
    pub due_date: Option<Time>,
    /// Assignee
    pub assigned_to: Option<UserId>,
    /// Share in the parent's progress, defaults to 0
    pub weight: Option<f64>,
}

impl TaskSpec {
    /// A spec with only the required fields set.
    pub fn new(title: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            project_id,
            parent_task: None,
            status: None,
            priority: None,
            due_date: None,
            assigned_to: None,
            weight: None,
        }
    }

    /// Place the task under `parent`.
    pub fn under(mut self, parent: TaskId) -> Self {
        self.parent_task = Some(parent);
        self
    }

    /// Set the weight.
    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Field changes for [`WorkManager::update_task`]; `None` keeps the value.
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<Time>,
    pub assigned_to: Option<UserId>,
}

/// Result of a direct progress mutation.
#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    /// The leaf task as written
    pub task: Task,
    /// What happened to its ancestors
    pub rollup: RollupReport,
}

/// One entry of [`WorkManager::task_tree`].
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Depth relative to the requested root
    pub depth: usize,
    /// The task
    pub task: Task,
}

/// Basic work manager implementation.
pub struct BasicWorkManager<S: Storage> {
    storage: Arc<S>,
    rollup: RollupEngine<S>,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Storage> BasicWorkManager<S> {
    /// Create a new work manager.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            rollup: RollupEngine::new(Arc::clone(&storage)),
            storage,
            policy: Arc::new(AllowAll),
        }
    }

    /// Set the access policy.
    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Set the rollup configuration.
    pub fn with_rollup_config(mut self, config: RollupConfig) -> Self {
        self.rollup = self.rollup.with_config(config);
        self
    }

    async fn load(&self, id: TaskId) -> Result<Task> {
        self.storage
            .load_task(id)
            .await?
            .ok_or_else(|| WorkError::not_found("task", id))
    }

    /// Load `id` and make sure nobody references it as parent.
    async fn load_leaf(&self, id: TaskId) -> Result<Task> {
        let task = self.load(id).await?;
        let children = self.storage.count_children(id).await?;
        if children > 0 {
            warn!("Rejected direct progress change on task {} with {} subtasks", id, children);
            return Err(WorkError::NotALeaf(id));
        }
        Ok(task)
    }

    /// Persist a leaf mutation, then roll it up. Rollup failures only show
    /// up as warnings on the report.
    async fn commit_leaf(&self, task: Task) -> Result<ProgressOutcome> {
        self.storage.save_task(&task).await?;
        let rollup = self.rollup.propagate_from(&task).await;
        for warning in &rollup.warnings {
            warn!("Task {} saved but ancestors are stale: {}", task.id, warning);
        }
        Ok(ProgressOutcome { task, rollup })
    }
}

fn validate_weight(weight: f64) -> Result<f64> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(WorkError::InvalidInput(format!(
            "weight must be a non-negative number, got {}",
            weight
        )))
    }
}

fn required(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(WorkError::InvalidInput(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

#[async_trait]
impl<S: Storage + 'static> WorkManager for BasicWorkManager<S> {
    async fn create_task(&self, actor: &Actor, spec: TaskSpec) -> Result<Task> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;

        let title = required("title", spec.title)?;
        let weight = validate_weight(spec.weight.unwrap_or(0.0))?;

        if self.storage.load_project(spec.project_id).await?.is_none() {
            return Err(WorkError::not_found("project", spec.project_id));
        }

        let mut task = Task::new(title, spec.project_id, actor.user_id);
        if let Some(parent_id) = spec.parent_task {
            let parent = self
                .storage
                .load_task(parent_id)
                .await?
                .ok_or_else(|| WorkError::not_found("parent task", parent_id))?;
            task = task.with_parent(&parent);
        }
        task.description = spec.description;
        task.status = spec.status.unwrap_or_default();
        task.priority = spec.priority.unwrap_or_default();
        task.due_date = spec.due_date;
        task.assigned_to = spec.assigned_to;
        task.weight = weight;

        self.storage.save_task(&task).await?;
        info!("Created task {} at level {}", task.id, task.level);
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.load(id).await
    }

    async fn list_tasks(&self, actor: &Actor, mut filter: TaskFilter) -> Result<Vec<Task>> {
        self.policy.authorize(Some(actor), Capability::View)?;
        filter.involving = Some(actor.user_id);
        Ok(self.storage.list_tasks(&filter).await?)
    }

    async fn update_task(&self, actor: &Actor, id: TaskId, changes: TaskChanges) -> Result<Task> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;
        let mut task = self.load(id).await?;

        if let Some(title) = changes.title {
            task.title = required("title", title)?;
        }
        if let Some(description) = changes.description {
            task.description = description;
        }
        if let Some(status) = changes.status {
            task.status = status;
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(assignee) = changes.assigned_to {
            task.assigned_to = Some(assignee);
        }
        task.updated_at = chrono::Utc::now();

        self.storage.save_task(&task).await?;
        info!("Updated task {}", id);
        Ok(task)
    }

    async fn delete_task(&self, actor: &Actor, id: TaskId) -> Result<()> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;
        self.load(id).await?;
        self.storage.delete_task(id).await?;
        info!("Deleted task {}", id);
        Ok(())
    }

    async fn start_task(&self, actor: &Actor, id: TaskId) -> Result<Task> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;
        let mut task = self.load_leaf(id).await?;

        task.start(chrono::Utc::now());
        self.storage.save_task(&task).await?;
        info!("Started task {}", id);
        Ok(task)
    }

    async fn update_progress(
        &self,
        actor: &Actor,
        id: TaskId,
        delta: i32,
        note: Option<String>,
    ) -> Result<ProgressOutcome> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;
        let mut task = self.load_leaf(id).await?;

        let before = task.progress;
        let after = task.apply_delta(delta, note, chrono::Utc::now());
        info!("Task {} progress {} -> {} ({:+})", id, before, after, delta);
        self.commit_leaf(task).await
    }

    async fn complete_task(&self, actor: &Actor, id: TaskId) -> Result<ProgressOutcome> {
        self.policy.authorize(Some(actor), Capability::EditTasks)?;
        let mut task = self.load_leaf(id).await?;

        task.complete(chrono::Utc::now());
        info!("Completed task {}", id);
        self.commit_leaf(task).await
    }

    async fn task_tree(&self, root: TaskId) -> Result<Vec<TaskNode>> {
        let root = self.load(root).await?;
        let mut seen = HashSet::from([root.id]);
        let mut stack = vec![TaskNode { depth: 0, task: root }];
        let mut nodes = Vec::new();

        while let Some(node) = stack.pop() {
            let children = self.storage.find_children(node.task.id).await?;
            // Reverse so the oldest child is popped first.
            for child in children.into_iter().rev() {
                if seen.insert(child.id) {
                    stack.push(TaskNode { depth: node.depth + 1, task: child });
                }
            }
            nodes.push(node);
        }

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktree_core::{Project, UserType};
    use tasktree_storage::JsonStorage;

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: Arc<JsonStorage>,
        manager: BasicWorkManager<JsonStorage>,
        actor: Actor,
        project: Project,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        let actor = Actor { user_id: UserId::new(), user_type: UserType::Member };
        let project = Project::new("Website", actor.user_id);
        storage.save_project(&project).await.unwrap();
        let manager = BasicWorkManager::new(Arc::clone(&storage));
        Fixture { _dir: dir, storage, manager, actor, project }
    }

    impl Fixture {
        async fn task(&self, title: &str, parent: Option<&Task>, weight: f64) -> Task {
            let mut spec = TaskSpec::new(title, self.project.id).weighted(weight);
            if let Some(parent) = parent {
                spec = spec.under(parent.id);
            }
            self.manager.create_task(&self.actor, spec).await.unwrap()
        }

        async fn progress(&self, task: &Task) -> u8 {
            self.storage.load_task(task.id).await.unwrap().unwrap().progress
        }
    }

    #[tokio::test]
    async fn test_create_task_levels() {
        let f = fixture().await;
        let root = f.task("Root", None, 1.0).await;
        let mid = f.task("Mid", Some(&root), 1.0).await;
        let leaf = f.task("Leaf", Some(&mid), 1.0).await;

        assert_eq!(root.level, 0);
        assert_eq!(mid.level, 1);
        assert_eq!(leaf.level, 2);
        assert_eq!(leaf.created_by, f.actor.user_id);
        assert_eq!(leaf.status, TaskStatus::NotStarted);
        assert_eq!(leaf.progress, 0);
    }

    #[tokio::test]
    async fn test_create_task_defaults_weight_to_zero() {
        let f = fixture().await;
        let task = f
            .manager
            .create_task(&f.actor, TaskSpec::new("Plain", f.project.id))
            .await
            .unwrap();
        assert_eq!(task.weight, 0.0);
    }

    #[tokio::test]
    async fn test_create_task_rejects_bad_input() {
        let f = fixture().await;

        let negative = TaskSpec::new("Negative", f.project.id).weighted(-1.0);
        assert!(matches!(
            f.manager.create_task(&f.actor, negative).await,
            Err(WorkError::InvalidInput(_))
        ));

        let blank = TaskSpec::new("  ", f.project.id);
        assert!(matches!(
            f.manager.create_task(&f.actor, blank).await,
            Err(WorkError::InvalidInput(_))
        ));

        let orphan = TaskSpec::new("Orphan", f.project.id).under(TaskId::new());
        assert!(matches!(
            f.manager.create_task(&f.actor, orphan).await,
            Err(WorkError::NotFound { kind: "parent task", .. })
        ));

        let homeless = TaskSpec::new("Homeless", ProjectId::new());
        assert!(matches!(
            f.manager.create_task(&f.actor, homeless).await,
            Err(WorkError::NotFound { kind: "project", .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_delta_clamps() {
        let f = fixture().await;
        let leaf = f.task("Leaf", None, 1.0).await;

        let outcome = f.manager.update_progress(&f.actor, leaf.id, 95, None).await.unwrap();
        assert_eq!(outcome.task.progress, 95);
        let outcome = f.manager.update_progress(&f.actor, leaf.id, 20, None).await.unwrap();
        assert_eq!(outcome.task.progress, 100);

        let outcome = f.manager.update_progress(&f.actor, leaf.id, -95, None).await.unwrap();
        assert_eq!(outcome.task.progress, 5);
        let outcome = f.manager.update_progress(&f.actor, leaf.id, -20, None).await.unwrap();
        assert_eq!(outcome.task.progress, 0);

        let stored = f.storage.load_task(leaf.id).await.unwrap().unwrap();
        let notes: Vec<&str> = stored.progress_history.iter().map(|e| e.note.as_str()).collect();
        assert_eq!(notes, vec!["+95%", "+20%", "-95%", "-20%"]);
    }

    #[tokio::test]
    async fn test_progress_rolls_up_weighted() {
        let f = fixture().await;
        let parent = f.task("Parent", None, 1.0).await;
        let heavy = f.task("Heavy", Some(&parent), 2.0).await;
        let light = f.task("Light", Some(&parent), 1.0).await;

        f.manager.update_progress(&f.actor, heavy.id, 50, None).await.unwrap();
        let outcome = f.manager.complete_task(&f.actor, light.id).await.unwrap();

        assert!(outcome.rollup.is_complete());
        assert_eq!(outcome.rollup.progress_of(parent.id), Some(67));
        assert_eq!(f.progress(&parent).await, 67);
    }

    #[tokio::test]
    async fn test_zero_weight_children_roll_up_to_zero() {
        let f = fixture().await;
        let parent = f.task("Parent", None, 1.0).await;
        let a = f.task("A", Some(&parent), 0.0).await;
        let b = f.task("B", Some(&parent), 0.0).await;

        f.manager.update_progress(&f.actor, a.id, 80, None).await.unwrap();
        f.manager.complete_task(&f.actor, b.id).await.unwrap();

        assert_eq!(f.progress(&parent).await, 0);
    }

    #[tokio::test]
    async fn test_three_level_rollup_uses_new_mid_value() {
        let f = fixture().await;
        let root = f.task("Root", None, 1.0).await;
        let mid = f.task("Mid", Some(&root), 1.0).await;
        let other = f.task("Other", Some(&root), 1.0).await;
        let leaf = f.task("Leaf", Some(&mid), 1.0).await;

        f.manager.update_progress(&f.actor, other.id, 20, None).await.unwrap();
        let outcome = f.manager.update_progress(&f.actor, leaf.id, 60, None).await.unwrap();

        let order: Vec<TaskId> = outcome.rollup.updated.iter().map(|s| s.task_id).collect();
        assert_eq!(order, vec![mid.id, root.id]);
        assert_eq!(f.progress(&mid).await, 60);
        assert_eq!(f.progress(&root).await, 40);
    }

    #[tokio::test]
    async fn test_direct_update_on_parent_is_rejected() {
        let f = fixture().await;
        let root = f.task("Root", None, 1.0).await;
        let parent = f.task("Parent", Some(&root), 1.0).await;
        let child = f.task("Child", Some(&parent), 1.0).await;
        f.manager.update_progress(&f.actor, child.id, 30, None).await.unwrap();

        let err = f.manager.update_progress(&f.actor, parent.id, 10, None).await.unwrap_err();
        assert!(matches!(err, WorkError::NotALeaf(id) if id == parent.id));
        assert!(matches!(
            f.manager.complete_task(&f.actor, parent.id).await,
            Err(WorkError::NotALeaf(_))
        ));
        assert!(matches!(
            f.manager.start_task(&f.actor, parent.id).await,
            Err(WorkError::NotALeaf(_))
        ));

        assert_eq!(f.progress(&parent).await, 30);
        assert_eq!(f.progress(&root).await, 30);
        let stored = f.storage.load_task(parent.id).await.unwrap().unwrap();
        assert!(stored.progress_history.is_empty());
    }

    #[tokio::test]
    async fn test_complete_sets_full_progress() {
        let f = fixture().await;
        let leaf = f.task("Leaf", None, 1.0).await;
        f.manager.update_progress(&f.actor, leaf.id, 40, None).await.unwrap();

        let outcome = f.manager.complete_task(&f.actor, leaf.id).await.unwrap();

        assert_eq!(outcome.task.progress, 100);
        assert_eq!(outcome.task.status, TaskStatus::Completed);
        assert!(outcome.task.completed_at.is_some());
        assert_eq!(outcome.task.progress_history.last().unwrap().note, "Task completed");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let f = fixture().await;
        let missing = TaskId::new();

        assert!(matches!(
            f.manager.update_progress(&f.actor, missing, 10, None).await,
            Err(WorkError::NotFound { kind: "task", .. })
        ));
        assert!(matches!(f.manager.get_task(missing).await, Err(WorkError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_rollup_warning_does_not_fail_leaf_update() {
        let f = fixture().await;
        let parent = f.task("Parent", None, 1.0).await;
        let child = f.task("Child", Some(&parent), 1.0).await;
        f.storage.delete_task(parent.id).await.unwrap();

        let outcome = f.manager.update_progress(&f.actor, child.id, 10, None).await.unwrap();

        assert_eq!(outcome.task.progress, 10);
        assert!(!outcome.rollup.is_complete());
        assert_eq!(f.progress(&child).await, 10);
    }

    #[tokio::test]
    async fn test_start_task() {
        let f = fixture().await;
        let leaf = f.task("Leaf", None, 1.0).await;

        let started = f.manager.start_task(&f.actor, leaf.id).await.unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.is_some());
    }

    #[tokio::test]
    async fn test_update_task_keeps_unset_fields() {
        let f = fixture().await;
        let leaf = f.task("Leaf", None, 1.0).await;
        let assignee = UserId::new();

        let updated = f
            .manager
            .update_task(
                &f.actor,
                leaf.id,
                TaskChanges {
                    priority: Some(Priority::High),
                    assigned_to: Some(assignee),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Leaf");
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.assigned_to, Some(assignee));
        assert_eq!(updated.weight, 1.0);
    }

    #[tokio::test]
    async fn test_list_tasks_only_involving_actor() {
        let f = fixture().await;
        let mine = f.task("Mine", None, 1.0).await;

        let stranger = Actor { user_id: UserId::new(), user_type: UserType::Member };
        let theirs = f
            .manager
            .create_task(&stranger, TaskSpec::new("Theirs", f.project.id))
            .await
            .unwrap();
        let mut assigned = TaskSpec::new("Assigned to me", f.project.id);
        assigned.assigned_to = Some(f.actor.user_id);
        let assigned = f.manager.create_task(&stranger, assigned).await.unwrap();

        let listed: Vec<TaskId> = f
            .manager
            .list_tasks(&f.actor, TaskFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();

        assert!(listed.contains(&mine.id));
        assert!(listed.contains(&assigned.id));
        assert!(!listed.contains(&theirs.id));
    }

    #[tokio::test]
    async fn test_delete_task_leaves_children() {
        let f = fixture().await;
        let parent = f.task("Parent", None, 1.0).await;
        let child = f.task("Child", Some(&parent), 1.0).await;

        f.manager.delete_task(&f.actor, parent.id).await.unwrap();

        let child = f.manager.get_task(child.id).await.unwrap();
        assert_eq!(child.parent_task, Some(parent.id));
        assert!(matches!(
            f.manager.delete_task(&f.actor, parent.id).await,
            Err(WorkError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_task_tree_depth_first() {
        let f = fixture().await;
        let root = f.task("Root", None, 1.0).await;
        let a = f.task("A", Some(&root), 1.0).await;
        let a1 = f.task("A1", Some(&a), 1.0).await;
        let b = f.task("B", Some(&root), 1.0).await;

        let tree = f.manager.task_tree(root.id).await.unwrap();
        let shape: Vec<(TaskId, usize)> = tree.iter().map(|n| (n.task.id, n.depth)).collect();

        assert_eq!(shape, vec![(root.id, 0), (a.id, 1), (a1.id, 2), (b.id, 1)]);
    }
}
