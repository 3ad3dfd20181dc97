//! Progress Rollup
//!
//! Derives parent task progress from weighted children, walking up to the root.

#![warn(missing_docs)]

pub mod rollup;

pub use rollup::{
    weighted_progress, RollupConfig, RollupEngine, RollupReport, RollupStage, RollupStep,
    RollupWarning, DEFAULT_MAX_DEPTH,
};
