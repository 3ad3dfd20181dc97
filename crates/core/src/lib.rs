//! tasktree core data models.
//!
//! This crate defines projects, users and the hierarchical tasks whose
//! progress rolls up from leaves to roots.

#![warn(missing_docs)]

// Core identities
mod id;
mod error;

// Entities
mod project;
mod task;
mod user;

// Re-exports
pub use id::*;
pub use error::ParseError;

pub use project::{Project, ProjectStatus};
pub use task::{
    Task, TaskStatus, Priority, ProgressEntry, TaskFilter, ParentFilter,
    clamp_progress, delta_note, MAX_PROGRESS, COMPLETED_NOTE,
};
pub use user::{User, UserType};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
