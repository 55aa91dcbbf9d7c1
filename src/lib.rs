//! # rcps-scheduler
//!
//! A resource-constrained project scheduling library: turn a [`data::Bundle`]
//! of tasks, resources, and tuning into a committed schedule.

#![deny(
    clippy::undocumented_unsafe_blocks,
    clippy::missing_safety_doc,
    reason = "multi-person projects should document dangers"
)]
#![warn(missing_docs)]
#![cfg_attr(
    not(any(test, debug_assertions)),
    deny(
        clippy::missing_panics_doc,
        clippy::panic,
        clippy::unimplemented,
        clippy::unwrap_used,
        reason = "prefer errors over panicking"
    )
)]
#![cfg_attr(
    not(any(test, debug_assertions)),
    forbid(clippy::todo, reason = "production code should not use `todo`")
)]

pub mod algo;
pub mod data;

pub use algo::{
    AlgorithmResult, BoundedRollout, CriticalPath, ParallelSgs, RolloutChoice, RolloutDecision,
    ScheduledTask, SchedulingAlgorithm, SchedulingError, Warning, schedule, schedule_with,
};
pub use data::bundle::Bundle;
pub use data::config::SchedulingConfig;
