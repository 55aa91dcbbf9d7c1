//! Turn a [`Bundle`](crate::data::bundle::Bundle) into a schedule.
//!
//! [`schedule`] is the sole entry point most callers need: a pure function
//! `bundle -> result` running the Parallel SGS forward pass with the
//! bounded-rollout commit check always live. [`schedule_with`] exposes the
//! closed set of variants for callers that want the critical-path
//! scheduler instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::bundle::Bundle;
use crate::data::config::{SchedulingConfig, Strategy};
use crate::data::resource::ResourceId;
use crate::data::task::TaskId;

pub mod critical_path;
pub mod fixed_date;
pub mod interval_store;
pub mod math;
pub mod preprocessor;
pub mod resolver;
pub mod rollout;
pub mod sgs;
pub mod sort_key;

/// Fatal error aborting a [`schedule`] run before it produces a result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulingError {
    /// The dependency graph (ignoring already-completed tasks) has a cycle;
    /// one offending `(predecessor, task)` edge is reported.
    #[error("dependency cycle detected at edge {0:?}")]
    CycleDetected(Vec<(TaskId, TaskId)>),
    /// A dependency names a task that is neither pending nor completed.
    #[error("task `{0}` depends on unknown task `{1}`")]
    UnknownDependency(TaskId, TaskId),
    /// The forward pass made no progress with tasks still unscheduled and no
    /// future event to advance to.
    #[error("could not schedule {0:?}")]
    UnschedulableResidual(Vec<TaskId>),
    /// A task's resource requirement names a resource the bundle never
    /// declared.
    #[error("task `{0}` names unknown resource `{1}`")]
    UnknownResource(TaskId, ResourceId),
    /// A task's resource requirement names a group the bundle never
    /// declared.
    #[error("task `{0}` names unknown group `{1}`")]
    UnknownGroup(TaskId, String),
    /// A configuration value is internally inconsistent.
    #[error("bad config field `{field}`: {reason}")]
    BadConfig {
        /// Which field.
        field: &'static str,
        /// Why it's invalid.
        reason: String,
    },
}

/// Non-fatal: returned alongside a successful [`AlgorithmResult`], never
/// aborts a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    /// A task's computed end landed after its `end_before`.
    DeadlineMissed {
        task: TaskId,
        computed_end: DateTime<Utc>,
        required_end: DateTime<Utc>,
    },
    /// A fixed task's predecessor finishes (plus lag) after the fixed
    /// task's start.
    FixedTaskPredecessorLate {
        task: TaskId,
        predecessor: TaskId,
        lateness_days: f64,
    },
    /// A task's spec expanded to no live candidate and ran on the shared
    /// unassigned pseudo-resource.
    UnassignedTask { task: TaskId },
}

/// One committed task in the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Effective duration, already effort/allocation-adjusted.
    pub duration_days: f64,
    /// Concrete resources claimed — never a spec string.
    pub resources: Vec<ResourceId>,
}

/// Which way a bounded-rollout decision went for one leading candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutChoice {
    Commit,
    Skip,
}

/// One bounded-rollout decision, recorded for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutDecision {
    pub task: TaskId,
    pub choice: RolloutChoice,
    /// The more-urgent competitor whose presence triggered the check.
    pub competing: TaskId,
    pub commit_score: f64,
    pub skip_score: f64,
}

/// Everything a [`schedule`] run produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub scheduled: Vec<ScheduledTask>,
    pub warnings: Vec<Warning>,
    pub rollout_decisions: Vec<RolloutDecision>,
}

/// The closed set of schedulable variants.
pub trait SchedulingAlgorithm {
    fn run(&self, bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError>;
}

/// Parallel SGS forward pass with the bounded-rollout commit check
/// disabled — plain chronological greedy scheduling.
pub struct ParallelSgs;

/// Parallel SGS with the bounded-rollout commit check live at every
/// tick's leading candidate.
pub struct BoundedRollout;

/// Target-driven critical-path scheduler.
pub struct CriticalPath;

impl SchedulingAlgorithm for ParallelSgs {
    fn run(&self, bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError> {
        sgs::run(bundle, false)
    }
}

impl SchedulingAlgorithm for BoundedRollout {
    fn run(&self, bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError> {
        sgs::run(bundle, true)
    }
}

impl SchedulingAlgorithm for CriticalPath {
    fn run(&self, bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError> {
        critical_path::run(bundle)
    }
}

/// Catch internally-inconsistent tuning before any task is touched, e.g. the
/// `atc` strategy selected with a non-positive decay constant it would
/// divide by. Fatal, the same way a malformed dependency graph is fatal —
/// this never surfaces as a [`Warning`].
fn validate_config(cfg: &SchedulingConfig) -> Result<(), SchedulingError> {
    if cfg.strategy.strategy == Strategy::Atc && cfg.strategy.atc_k <= 0.0 {
        return Err(SchedulingError::BadConfig {
            field: "strategy.atc_k",
            reason: "must be positive when strategy is atc".to_string(),
        });
    }
    if cfg.critical_path.k <= 0.0 {
        return Err(SchedulingError::BadConfig {
            field: "critical_path.k",
            reason: "must be positive".to_string(),
        });
    }
    if cfg.critical_path.rollout_score_ratio_threshold < 1.0 {
        return Err(SchedulingError::BadConfig {
            field: "critical_path.rollout_score_ratio_threshold",
            reason: "must be >= 1.0, a candidate can't be within a ratio below parity of itself".to_string(),
        });
    }
    if cfg.rollout.max_horizon_days.is_some_and(|h| h <= 0.0) {
        return Err(SchedulingError::BadConfig {
            field: "rollout.max_horizon_days",
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

/// Run a named variant against `bundle`.
pub fn schedule_with(bundle: &Bundle, algorithm: &dyn SchedulingAlgorithm) -> Result<AlgorithmResult, SchedulingError> {
    validate_config(&bundle.config)?;
    algorithm.run(bundle)
}


/// Produce a schedule for `bundle`: the default entry point, Parallel SGS
/// with bounded rollout always live.
pub fn schedule(bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError> {
    schedule_with(bundle, &BoundedRollout)
}
