//! Fixed-date layer: tasks pinned to `start_on`/`end_on` bypass the
//! scheduler entirely. They're resolved and inserted into their resources'
//! stores before the forward pass begins, and the forward pass sees them as
//! ordinary busy intervals.

use either::Either;
use rustc_hash::FxHashMap;

use crate::algo::interval_store::{ResourceSchedule, days_to_duration};
use crate::algo::resolver::unassigned_resource_id;
use crate::algo::{ScheduledTask, Warning};
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{Task, TaskIdMap, TaskIdSet};

/// The calendar window a fixed task claims, filling in whichever endpoint
/// wasn't stated using `duration_days`.
fn resolve_window(task: &Task) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let span = days_to_duration(task.duration_days);
    match (task.start_on, task.end_on) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start + span),
        (None, Some(end)) => (end - span, end),
        (None, None) => unreachable!("resolve_window called on a non-fixed task"),
    }
}

/// Which concrete resources a fixed task claims: every named resource for
/// an explicit set, or the first candidate in a spec's expansion order
/// (there is no "earliest completion" race to run — the date is already
/// fixed).
fn resolve_resources(
    task: &Task,
    parsed_spec: Option<&Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
) -> (Vec<ResourceId>, bool) {
    match &task.resource_requirement {
        Either::Left(allocations) => (allocations.iter().map(|a| a.resource.clone()).collect(), false),
        Either::Right(_) => {
            let spec = parsed_spec.expect("spec requirement must have a parsed Spec by fixed-date time");
            let candidates = spec.expand(all_resources, groups);
            match candidates.into_iter().next() {
                Some(first) => (vec![first], false),
                None => (vec![unassigned_resource_id()], true),
            }
        }
    }
}

/// Result of running the fixed-date layer.
pub struct FixedDateResult {
    /// One [`ScheduledTask`] per fixed task, already claiming its resources.
    pub scheduled: Vec<ScheduledTask>,
    pub warnings: Vec<Warning>,
}

/// Pre-process every fixed task (`start_on`/`end_on` set), inserting its
/// claimed window into `stores` and returning its [`ScheduledTask`] record.
///
/// Predecessor lateness is only checked against predecessors whose end is
/// already known at this point: completed tasks (treated as done at
/// `bundle.current_date`) and other fixed tasks already applied in this same
/// pass. A predecessor left to the ordinary forward pass hasn't been
/// scheduled yet, so no claim can be made about it here.
pub fn apply(
    tasks: &[Task],
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    current_date: chrono::DateTime<chrono::Utc>,
    completed: &TaskIdSet,
    stores: &mut FxHashMap<ResourceId, ResourceSchedule>,
) -> FixedDateResult {
    let mut scheduled = Vec::new();
    let mut warnings = Vec::new();
    let mut known_ends: TaskIdMap<chrono::DateTime<chrono::Utc>> = TaskIdMap::default();
    for id in completed {
        known_ends.insert(id.clone(), current_date);
    }

    for task in tasks.iter().filter(|t| t.is_fixed()) {
        let (start, end) = resolve_window(task);
        let (resources, fell_back_to_unassigned) =
            resolve_resources(task, parsed_specs.get(&task.id), all_resources, groups);

        let interval = crate::data::interval::TimeInterval::new(start, end);
        for resource in &resources {
            stores
                .entry(resource.clone())
                .or_insert_with(|| ResourceSchedule::new(resource.clone(), Vec::new()))
                .insert_overriding(interval);
        }

        for dep in &task.dependencies {
            if let Some(&pred_end) = known_ends.get(&dep.predecessor) {
                let required = pred_end + days_to_duration(dep.lag_days);
                if required > start {
                    warnings.push(Warning::FixedTaskPredecessorLate {
                        task: task.id.clone(),
                        predecessor: dep.predecessor.clone(),
                        lateness_days: crate::algo::interval_store::duration_to_days(required - start),
                    });
                }
            }
        }

        if fell_back_to_unassigned {
            warnings.push(Warning::UnassignedTask {
                task: task.id.clone(),
            });
        }
        if let Some(deadline) = task.end_before {
            if end > deadline {
                warnings.push(Warning::DeadlineMissed {
                    task: task.id.clone(),
                    computed_end: end,
                    required_end: deadline,
                });
            }
        }

        known_ends.insert(task.id.clone(), end);
        scheduled.push(ScheduledTask {
            task_id: task.id.clone(),
            start_date: start,
            end_date: end,
            duration_days: task.duration_days,
            resources,
        });
    }

    FixedDateResult { scheduled, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::task::{Dependency, ResourceRequirement, TaskId};
    use crate::time_interval;

    fn fixed_task(id: &str, start_on: Option<chrono::DateTime<chrono::Utc>>, dur: f64, deps: Vec<(&str, f64)>) -> Task {
        Task {
            id: TaskId::from(id),
            duration_days: dur,
            resource_requirement: ResourceRequirement::Left(vec![crate::data::task::ResourceAllocation {
                resource: ResourceId::from("alice"),
                allocation: 1.0,
            }]),
            dependencies: deps
                .into_iter()
                .map(|(p, lag)| Dependency {
                    predecessor: TaskId::from(p),
                    lag_days: lag,
                })
                .collect(),
            priority: None,
            start_after: None,
            end_before: None,
            start_on,
            end_on: None,
            computed_deadline: None,
            computed_priority: None,
        }
    }

    #[test]
    fn test_fixed_task_inserted_into_resource_store() {
        let tasks = vec![fixed_task("kickoff", Some(time_interval! { 1/6/2025 - 1/7/2025 }.start), 2.0, vec![])];
        let mut stores = FxHashMap::default();
        let result = apply(
            &tasks,
            &TaskIdMap::default(),
            &[],
            &FxHashMap::default(),
            time_interval! { 1/1/2025 - 1/2/2025 }.start,
            &Default::default(),
            &mut stores,
        );
        assert_eq!(result.scheduled.len(), 1);
        assert_eq!(result.scheduled[0].start_date, time_interval! { 1/6/2025 - 1/7/2025 }.start);
        assert_eq!(result.scheduled[0].end_date, time_interval! { 1/8/2025 - 1/9/2025 }.start);
        assert!(stores[&ResourceId::from("alice")].is_busy_at(time_interval! { 1/7/2025 - 1/8/2025 }.start));
    }

    #[test]
    fn test_fixed_task_overlapping_dns_still_wins() {
        let tasks = vec![fixed_task("kickoff", Some(time_interval! { 1/6/2025 - 1/7/2025 }.start), 2.0, vec![])];
        let mut stores = FxHashMap::default();
        stores.insert(
            ResourceId::from("alice"),
            ResourceSchedule::new(ResourceId::from("alice"), vec![time_interval! { 1/5/2025 - 1/9/2025 }]),
        );
        let result = apply(
            &tasks,
            &TaskIdMap::default(),
            &[],
            &FxHashMap::default(),
            time_interval! { 1/1/2025 - 1/2/2025 }.start,
            &Default::default(),
            &mut stores,
        );
        assert_eq!(result.scheduled.len(), 1);
        let sched = &stores[&ResourceId::from("alice")];
        // DNS [1/5,1/9) and task [1/6,1/8) merge into one covering interval.
        assert_eq!(sched.intervals().len(), 1);
        assert_eq!(sched.intervals()[0], time_interval! { 1/5/2025 - 1/9/2025 });
    }

    #[test]
    fn test_late_predecessor_emits_warning() {
        let mut completed = crate::data::task::TaskIdSet::default();
        completed.insert(TaskId::from("design"));
        let tasks = vec![fixed_task(
            "kickoff",
            Some(time_interval! { 1/1/2025 - 1/2/2025 }.start),
            1.0,
            vec![("design", 5.0)],
        )];
        let mut stores = FxHashMap::default();
        let result = apply(
            &tasks,
            &TaskIdMap::default(),
            &[],
            &FxHashMap::default(),
            time_interval! { 1/1/2025 - 1/2/2025 }.start,
            &completed,
            &mut stores,
        );
        assert!(matches!(
            result.warnings.as_slice(),
            [Warning::FixedTaskPredecessorLate { .. }]
        ));
    }
}
