//! Progress rollup from leaf tasks to their ancestors.
//!
//! A parent's progress is the weighted average of its direct children:
//!
//! ```text
//! progress = round(Σ child.progress * child.weight / Σ child.weight)
//! ```
//!
//! and 0 when the children's weights sum to 0. After a leaf changes, the
//! engine recomputes its parent, then the grandparent, and so on up to the
//! root. The walk is best-effort: storage failures stop it and are returned
//! as warnings, never as errors, because the leaf write has already landed.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tasktree_core::{clamp_progress, Task, TaskId};
use tasktree_storage::{Storage, StorageError};
use tracing::{debug, error, warn};

/// Default bound on the number of ancestors one rollup may visit.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Configuration for the rollup engine.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Maximum number of ancestors recomputed by one walk
    pub max_depth: usize,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Weighted average of the children's progress, rounded to the nearest integer.
///
/// Returns 0 when the total weight is 0 (including an empty slice). Weights
/// are scaled by the largest one first so sums of huge weights stay finite.
pub fn weighted_progress(children: &[Task]) -> u8 {
    let max_weight = children.iter().map(|child| child.weight).fold(0.0_f64, f64::max);
    if max_weight <= 0.0 {
        return 0;
    }

    let mut total_weighted = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for child in children {
        let share = child.weight / max_weight;
        total_weighted += f64::from(child.progress) * share;
        total_weight += share;
    }

    clamp_progress((total_weighted / total_weight).round() as i64)
}

/// Where in a rollup step a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RollupStage {
    /// Loading the children of the ancestor
    FetchChildren,
    /// Writing the ancestor's new progress
    UpdateProgress,
    /// Re-loading the ancestor to find its own parent
    LoadParent,
}

/// A rollup step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RollupWarning {
    /// The storage backend failed
    #[allow(missing_docs)]
    StorageFailure {
        task_id: TaskId,
        stage: RollupStage,
        message: String,
    },
    /// An ancestor referenced by the chain no longer exists
    #[allow(missing_docs)]
    MissingTask { task_id: TaskId },
    /// The walk came back to a task it already updated
    #[allow(missing_docs)]
    Cycle { task_id: TaskId },
    /// The walk reached the depth bound before the root
    #[allow(missing_docs)]
    DepthExceeded { task_id: TaskId, max_depth: usize },
}

impl RollupWarning {
    fn from_storage(task_id: TaskId, stage: RollupStage, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => RollupWarning::MissingTask { task_id },
            other => RollupWarning::StorageFailure {
                task_id,
                stage,
                message: other.to_string(),
            },
        }
    }

    /// The ancestor the warning is about.
    pub fn task_id(&self) -> TaskId {
        match self {
            RollupWarning::StorageFailure { task_id, .. }
            | RollupWarning::MissingTask { task_id }
            | RollupWarning::Cycle { task_id }
            | RollupWarning::DepthExceeded { task_id, .. } => *task_id,
        }
    }
}

impl std::fmt::Display for RollupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollupWarning::StorageFailure { task_id, stage, message } => {
                write!(f, "rollup of {} failed at {:?}: {}", task_id, stage, message)
            }
            RollupWarning::MissingTask { task_id } => {
                write!(f, "rollup stopped: task {} no longer exists", task_id)
            }
            RollupWarning::Cycle { task_id } => {
                write!(f, "rollup stopped: task {} is its own ancestor", task_id)
            }
            RollupWarning::DepthExceeded { task_id, max_depth } => {
                write!(f, "rollup stopped at {}: deeper than {} levels", task_id, max_depth)
            }
        }
    }
}

/// One ancestor whose progress was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RollupStep {
    /// The ancestor
    pub task_id: TaskId,
    /// Its new progress
    pub progress: u8,
}

/// Outcome of one upward walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollupReport {
    /// Ancestors updated, nearest first
    pub updated: Vec<RollupStep>,
    /// Why the walk stopped early, if it did
    pub warnings: Vec<RollupWarning>,
}

impl RollupReport {
    /// Whether the walk reached the root (or a childless task) cleanly.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }

    /// New progress written for `task_id` during this walk.
    pub fn progress_of(&self, task_id: TaskId) -> Option<u8> {
        self.updated.iter().find(|s| s.task_id == task_id).map(|s| s.progress)
    }
}

/// Recomputes ancestor progress after a leaf changes.
pub struct RollupEngine<S: Storage> {
    storage: Arc<S>,
    config: RollupConfig,
}

impl<S: Storage> Clone for RollupEngine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
        }
    }
}

impl<S: Storage> RollupEngine<S> {
    /// Create an engine over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            config: RollupConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RollupConfig) -> Self {
        self.config = config;
        self
    }

    /// Roll up from a task that just changed: recompute its parent and every
    /// ancestor above it. A root task yields an empty report.
    pub async fn propagate_from(&self, task: &Task) -> RollupReport {
        match task.parent_task {
            Some(parent) => self.recompute_ancestors(parent).await,
            None => RollupReport::default(),
        }
    }

    /// Recompute `start` from its children, then walk up through its
    /// ancestors until a task without a parent is reached.
    ///
    /// A task without children ends the walk without being touched.
    pub async fn recompute_ancestors(&self, start: TaskId) -> RollupReport {
        let mut report = RollupReport::default();
        let mut visited = HashSet::new();
        let mut current = Some(start);

        while let Some(id) = current.take() {
            if !visited.insert(id) {
                warn!("Rollup cycle detected at task {}", id);
                report.warnings.push(RollupWarning::Cycle { task_id: id });
                break;
            }
            if visited.len() > self.config.max_depth {
                warn!("Rollup exceeded max depth {} at task {}", self.config.max_depth, id);
                report.warnings.push(RollupWarning::DepthExceeded {
                    task_id: id,
                    max_depth: self.config.max_depth,
                });
                break;
            }

            let children = match self.storage.find_children(id).await {
                Ok(children) => children,
                Err(e) => {
                    error!("Rollup failed to load children of {}: {}", id, e);
                    report
                        .warnings
                        .push(RollupWarning::from_storage(id, RollupStage::FetchChildren, e));
                    break;
                }
            };
            if children.is_empty() {
                debug!("Task {} has no children, rollup stops", id);
                break;
            }

            let progress = weighted_progress(&children);
            if let Err(e) = self.storage.update_progress(id, progress).await {
                error!("Rollup failed to update {}: {}", id, e);
                report
                    .warnings
                    .push(RollupWarning::from_storage(id, RollupStage::UpdateProgress, e));
                break;
            }
            debug!("Rolled up {} children into task {}: {}%", children.len(), id, progress);
            report.updated.push(RollupStep { task_id: id, progress });

            current = match self.storage.load_task(id).await {
                Ok(Some(task)) => task.parent_task,
                Ok(None) => {
                    warn!("Task {} vanished during rollup", id);
                    report.warnings.push(RollupWarning::MissingTask { task_id: id });
                    None
                }
                Err(e) => {
                    error!("Rollup failed to reload {}: {}", id, e);
                    report
                        .warnings
                        .push(RollupWarning::from_storage(id, RollupStage::LoadParent, e));
                    None
                }
            };
        }

        report
    }
}
