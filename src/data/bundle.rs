//! See [`Bundle`].

use chrono::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::data::config::SchedulingConfig;
use crate::data::interval::TimeInterval;
use crate::data::resource::{Resource, ResourceId};
use crate::data::task::{Task, TaskId, TaskIdSet};

/// Everything [`schedule`](crate::algo::schedule) needs: tasks, resources,
/// groups, calendar baseline, and tuning. Built once by the caller, consumed
/// by one run, then discarded — nothing persists outside the produced
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Every task to (potentially) schedule.
    pub tasks: Vec<Task>,

    /// Every resource, in declaration order — the order [`Spec::All`](crate::data::spec::Spec::All)
    /// expands in.
    pub resources: Vec<Resource>,

    /// Named groups of resource ids, in declaration order.
    #[serde(default)]
    pub groups: FxHashMap<String, Vec<ResourceId>>,

    /// Do-not-schedule periods merged into every resource's own DNS list.
    #[serde(default)]
    pub global_dns_periods: Vec<TimeInterval>,

    /// Baseline: no task is ever scheduled to start before this.
    pub current_date: DateTime<Utc>,

    /// Tasks already done as of `current_date` — excluded from eligibility
    /// and deadline/priority propagation, treated as scheduled at time zero.
    #[serde(default)]
    pub completed_task_ids: TaskIdSet,

    /// Algorithm tuning.
    #[serde(default)]
    pub config: SchedulingConfig,
}

impl Default for Bundle {
    /// An empty bundle anchored at the current instant — what a missing
    /// bundle file is populated with on first run.
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            resources: Vec::new(),
            groups: FxHashMap::default(),
            global_dns_periods: Vec::new(),
            current_date: Utc::now(),
            completed_task_ids: TaskIdSet::default(),
            config: SchedulingConfig::default(),
        }
    }
}

impl Bundle {
    /// Tasks that still need scheduling: everything not in
    /// [`completed_task_ids`](Bundle::completed_task_ids).
    pub fn pending_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| !self.completed_task_ids.contains(&t.id))
    }

    /// Resource ids in declaration order.
    pub fn resource_order(&self) -> Vec<ResourceId> {
        self.resources.iter().map(|r| r.id.clone()).collect()
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Look up a resource by id.
    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::task::{Dependency, ResourceRequirement};
    use either::Either;

    fn sample_task(id: &str) -> Task {
        Task {
            id: TaskId::from(id),
            duration_days: 1.0,
            resource_requirement: ResourceRequirement::Right("*".to_string()),
            dependencies: Vec::<Dependency>::new(),
            priority: None,
            start_after: None,
            end_before: None,
            start_on: None,
            end_on: None,
            computed_deadline: None,
            computed_priority: None,
        }
    }

    #[test]
    fn test_pending_tasks_excludes_completed() {
        let mut completed = TaskIdSet::default();
        completed.insert(TaskId::from("a"));

        let bundle = Bundle {
            tasks: vec![sample_task("a"), sample_task("b")],
            resources: vec![],
            groups: FxHashMap::default(),
            global_dns_periods: vec![],
            current_date: Utc::now(),
            completed_task_ids: completed,
            config: SchedulingConfig::default(),
        };

        let pending: Vec<_> = bundle.pending_tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(pending, vec!["b"]);
    }
}
