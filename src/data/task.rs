//! See [`Task`].

use chrono::prelude::*;
use either::Either;
use serde::{Deserialize, Serialize};

use crate::data::id_type;
use crate::data::resource::ResourceId;

id_type! {
    impl Id for TaskId as "task"
}

/// One `(resource_id, allocation)` pair in an explicit resource requirement.
///
/// `allocation` is the fraction of the resource's time this task consumes,
/// in `(0, 1]`; it divides into `duration_days` to get effort-adjusted
/// calendar length (see [`Task::resource_requirement`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// Which resource is claimed.
    pub resource: ResourceId,
    /// Fraction of the resource's time, in `(0, 1]`.
    pub allocation: f64,
}

/// How a [`Task`] names the resources it needs, as it comes out of the
/// bundle: either an explicit set, or raw resource-spec text (`"a|b|c"`,
/// `"*"`, `"group!x"`...). The text form is parsed into a
/// [`Spec`](crate::data::spec::Spec) exactly once, at the start of a
/// [`schedule`](crate::algo::schedule) run, once the bundle's group
/// declarations are known (see `crate::algo::preprocessor`) — this keeps
/// parsing out of `Deserialize` and out of the per-tick hot path.
pub type ResourceRequirement = Either<Vec<ResourceAllocation>, String>;

/// One `(predecessor, lag)` dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// The task that must complete first.
    pub predecessor: TaskId,
    /// Minimum delay, in days, between the predecessor's end and this task's
    /// start. Never negative.
    pub lag_days: f64,
}

/// The default task priority, used when a [`Task`] doesn't state one and no
/// `default_priority` is configured.
pub const DEFAULT_PRIORITY: u8 = 50;

/// A unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, echoed back in [`ScheduledTask`](crate::algo::ScheduledTask).
    pub id: TaskId,

    /// Effort in working days. Zero means a milestone (no duration).
    pub duration_days: f64,

    /// Which resources this task needs.
    pub resource_requirement: ResourceRequirement,

    /// Predecessor edges with lag.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Explicit priority, 0-100. [`None`] falls back to the configured
    /// default (see [`PreprocessorConfig::default_priority`](crate::data::config::PreprocessorConfig::default_priority)).
    #[serde(default)]
    pub priority: Option<u8>,

    /// Cannot start before this date.
    #[serde(default)]
    pub start_after: Option<DateTime<Utc>>,

    /// Hard deadline. Missing it produces a warning, not a failure.
    #[serde(default)]
    pub end_before: Option<DateTime<Utc>>,

    /// Fixes the task to an exact start date, bypassing the scheduler.
    /// Still claims resources.
    #[serde(default)]
    pub start_on: Option<DateTime<Utc>>,

    /// Fixes the task to an exact end date, bypassing the scheduler.
    /// Still claims resources.
    #[serde(default)]
    pub end_on: Option<DateTime<Utc>>,

    /// Filled in by the preprocessor: the deadline propagated
    /// backward from this task's descendants, or its own stated deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_deadline: Option<DateTime<Utc>>,

    /// Filled in by the preprocessor: `priority`, or the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_priority: Option<u8>,
}

impl Task {
    /// Whether this task is pinned to an exact start/end, bypassing the
    /// scheduler.
    pub fn is_fixed(&self) -> bool {
        self.start_on.is_some() || self.end_on.is_some()
    }

    /// `priority`, falling back to `default_priority` if unset.
    pub fn effective_priority(&self, default_priority: u8) -> u8 {
        self.priority.unwrap_or(default_priority)
    }
}
