//! Task model - a node in a project's task tree.

use serde::{Deserialize, Serialize};
use crate::error::ParseError;
use crate::id::{ProjectId, TaskId, UserId};
use crate::Time;

/// Upper bound for task progress.
pub const MAX_PROGRESS: u8 = 100;

/// Note recorded in the history when a task is completed.
pub const COMPLETED_NOTE: &str = "Task completed";

/// A task is a unit of work inside a project.
///
/// Tasks form a forest through `parent_task`. Leaf tasks have their progress
/// edited directly; every other task derives its progress from its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Task title
    pub title: String,

    /// Detailed description
    #[serde(default)]
    pub description: String,

    /// Current status
    pub status: TaskStatus,

    /// Priority
    #[serde(default)]
    pub priority: Priority,

    /// Due date
    pub due_date: Option<Time>,

    /// Who created the task
    pub created_by: UserId,

    /// Who the task is assigned to
    pub assigned_to: Option<UserId>,

    /// Parent task (back-reference, the parent does not list its children)
    pub parent_task: Option<TaskId>,

    /// Owning project
    pub project_id: ProjectId,

    /// Depth in the tree, fixed at creation (root = 0)
    pub level: u32,

    /// Contribution to the parent's weighted progress
    #[serde(default)]
    pub weight: f64,

    /// Percentage complete (0-100)
    pub progress: u8,

    /// Append-only log of direct progress changes
    #[serde(default)]
    pub progress_history: Vec<ProgressEntry>,

    /// When work started
    pub started_at: Option<Time>,

    /// When the task was completed
    pub completed_at: Option<Time>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Task {
    /// Create a root task with default values.
    pub fn new(title: impl Into<String>, project_id: ProjectId, created_by: UserId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::NotStarted,
            priority: Priority::default(),
            due_date: None,
            created_by,
            assigned_to: None,
            parent_task: None,
            project_id,
            level: 0,
            weight: 0.0,
            progress: 0,
            progress_history: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach this task under `parent`, deriving its level.
    pub fn with_parent(mut self, parent: &Task) -> Self {
        self.parent_task = Some(parent.id);
        self.level = parent.level + 1;
        self
    }

    /// Whether the task has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_task.is_none()
    }

    /// Whether `user` created or is assigned to this task.
    pub fn involves(&self, user: UserId) -> bool {
        self.created_by == user || self.assigned_to == Some(user)
    }

    /// Shift progress by `delta`, clamped to `0..=100`, and record it.
    ///
    /// Returns the new progress. When `note` is `None` the entry is labelled
    /// with the signed delta, e.g. `+10%`.
    pub fn apply_delta(&mut self, delta: i32, note: Option<String>, at: Time) -> u8 {
        let progress = clamp_progress(i64::from(self.progress) + i64::from(delta));
        self.progress = progress;
        self.record(note.unwrap_or_else(|| delta_note(delta)), at);
        progress
    }

    /// Mark the task completed at `at`.
    pub fn complete(&mut self, at: Time) {
        self.status = TaskStatus::Completed;
        self.progress = MAX_PROGRESS;
        self.completed_at = Some(at);
        self.record(COMPLETED_NOTE.to_string(), at);
    }

    /// Mark the task started at `at`.
    pub fn start(&mut self, at: Time) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(at);
        self.updated_at = at;
    }

    fn record(&mut self, note: String, at: Time) {
        self.progress_history.push(ProgressEntry {
            progress: self.progress,
            timestamp: at,
            note,
        });
        self.updated_at = at;
    }
}

/// One entry of a task's progress history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Progress after the change
    pub progress: u8,

    /// When the change happened
    pub timestamp: Time,

    /// Human-readable note
    pub note: String,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started yet
    #[serde(rename = "Not Started")]
    NotStarted,
    /// Being worked on
    #[serde(rename = "In Progress")]
    InProgress,
    /// Done
    Completed,
}

impl TaskStatus {
    /// Display name, also used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::NotStarted
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "notstarted" | "todo" => Ok(TaskStatus::NotStarted),
            "inprogress" | "active" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            _ => Err(ParseError::new("task status", s)),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait
    Low,
    /// Default
    Medium,
    /// Do first
    High,
}

impl Priority {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(ParseError::new("priority", s)),
        }
    }
}

/// Clamp a raw progress value into `0..=100`.
pub fn clamp_progress(raw: i64) -> u8 {
    raw.clamp(0, i64::from(MAX_PROGRESS)) as u8
}

/// Default history note for a delta update: `+10%`, `-5%`, `0%`.
pub fn delta_note(delta: i32) -> String {
    if delta > 0 {
        format!("+{delta}%")
    } else {
        format!("{delta}%")
    }
}

/// Filter for querying tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks this user created or is assigned to
    pub involving: Option<UserId>,

    /// Filter by project
    pub project: Option<ProjectId>,

    /// Filter by assignee
    pub assigned_to: Option<UserId>,

    /// Filter by creator
    pub created_by: Option<UserId>,

    /// Filter by position in the tree
    pub parent: Option<ParentFilter>,
}

/// Parent constraint of a [`TaskFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentFilter {
    /// Tasks without a parent
    Root,
    /// Direct children of the given task
    Of(TaskId),
}

impl TaskFilter {
    /// Filter matching the direct children of `parent`.
    pub fn children_of(parent: TaskId) -> Self {
        Self {
            parent: Some(ParentFilter::Of(parent)),
            ..Default::default()
        }
    }

    /// Check a task against every set constraint.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(user) = self.involving {
            if !task.involves(user) {
                return false;
            }
        }
        if let Some(project) = self.project {
            if task.project_id != project {
                return false;
            }
        }
        if let Some(assignee) = self.assigned_to {
            if task.assigned_to != Some(assignee) {
                return false;
            }
        }
        if let Some(creator) = self.created_by {
            if task.created_by != creator {
                return false;
            }
        }
        match self.parent {
            Some(ParentFilter::Root) => task.is_root(),
            Some(ParentFilter::Of(parent)) => task.parent_task == Some(parent),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Task {
        Task::new("Write docs", ProjectId::new(), UserId::new())
    }

    #[test]
    fn test_apply_delta_clamps_high() {
        let mut task = leaf();
        task.progress = 95;
        let now = chrono::Utc::now();

        assert_eq!(task.apply_delta(20, None, now), 100);
        assert_eq!(task.progress, 100);
        assert_eq!(task.progress_history.last().unwrap().note, "+20%");
    }

    #[test]
    fn test_apply_delta_clamps_low() {
        let mut task = leaf();
        task.progress = 5;

        assert_eq!(task.apply_delta(-20, None, chrono::Utc::now()), 0);
        assert_eq!(task.progress_history[0].progress, 0);
        assert_eq!(task.progress_history[0].note, "-20%");
    }

    #[test]
    fn test_apply_delta_keeps_caller_note() {
        let mut task = leaf();
        task.apply_delta(10, Some("drafted intro".to_string()), chrono::Utc::now());

        assert_eq!(task.progress, 10);
        assert_eq!(task.progress_history[0].note, "drafted intro");
    }

    #[test]
    fn test_history_is_append_only() {
        let mut task = leaf();
        let now = chrono::Utc::now();
        task.apply_delta(30, None, now);
        task.apply_delta(-10, None, now);
        task.complete(now);

        let progress: Vec<u8> = task.progress_history.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![30, 20, 100]);
        assert_eq!(task.progress_history[2].note, COMPLETED_NOTE);
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut task = leaf();
        task.progress = 40;
        let now = chrono::Utc::now();
        task.complete(now);

        assert_eq!(task.progress, 100);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(now));
    }

    #[test]
    fn test_delta_note_format() {
        assert_eq!(delta_note(10), "+10%");
        assert_eq!(delta_note(-5), "-5%");
        assert_eq!(delta_note(0), "0%");
    }

    #[test]
    fn test_with_parent_sets_level() {
        let root = leaf();
        let mid = leaf().with_parent(&root);
        let child = leaf().with_parent(&mid);

        assert_eq!(mid.level, 1);
        assert_eq!(child.level, 2);
        assert_eq!(child.parent_task, Some(mid.id));
        assert!(root.is_root());
        assert!(!child.is_root());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::NotStarted).unwrap();
        assert_eq!(json, "\"Not Started\"");
        let status: TaskStatus = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(status, TaskStatus::InProgress);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("Not Started".parse::<TaskStatus>().unwrap(), TaskStatus::NotStarted);
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let user = UserId::new();
        let mut root = leaf();
        root.assigned_to = Some(user);
        let child = leaf().with_parent(&root);

        let filter = TaskFilter {
            involving: Some(user),
            parent: Some(ParentFilter::Root),
            ..Default::default()
        };
        assert!(filter.matches(&root));
        assert!(!filter.matches(&child));

        assert!(TaskFilter::children_of(root.id).matches(&child));
        assert!(!TaskFilter::children_of(child.id).matches(&root));
    }
}
