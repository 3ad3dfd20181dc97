//! Work services.
//!
//! Task, project and user operations on top of a [`tasktree_storage::Storage`]
//! backend. Direct progress changes go through [`WorkManager`], which guards
//! leaf-only mutation and hands the result to the rollup engine.

#![warn(missing_docs)]

pub mod access;
pub mod delta;
pub mod error;
pub mod manager;
pub mod projects;
pub mod users;

pub use access::{AccessPolicy, Actor, AllowAll, Capability, RolePolicy};
pub use delta::parse_delta;
pub use error::{Result, WorkError};
pub use manager::{
    BasicWorkManager, ProgressOutcome, TaskChanges, TaskNode, TaskSpec, WorkManager,
};
pub use projects::{ProjectChanges, ProjectManager, ProjectSpec};
pub use users::{UserManager, UserSpec};
