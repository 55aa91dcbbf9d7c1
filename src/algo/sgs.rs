//! Parallel SGS forward pass: the chronological greedy core every variant in
//! `crate::algo` ultimately runs, with the bounded-rollout commit check as an
//! optional drop-in replacement for the leading candidate's commit decision.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::algo::interval_store::{ResourceSchedule, days_to_duration};
use crate::algo::resolver::{self, ResolveOutcome};
use crate::algo::sort_key::sort_by_urgency;
use crate::algo::{fixed_date, preprocessor, rollout};
use crate::algo::{AlgorithmResult, RolloutChoice, RolloutDecision, ScheduledTask, SchedulingError, Warning};
use crate::data::bundle::Bundle;
use crate::data::interval::TimeInterval;
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{Task, TaskId, TaskIdMap, TaskIdSet};

/// Plain-data scheduler state, cheap enough to clone wholesale for each
/// bounded-rollout simulation scenario.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub now: DateTime<Utc>,
    pub scheduled: TaskIdMap<ScheduledTask>,
    pub unscheduled: TaskIdSet,
    pub stores: FxHashMap<ResourceId, ResourceSchedule>,
}

pub(crate) fn is_eligible(task: &Task, state: &SchedulerState, bundle: &Bundle) -> bool {
    if let Some(after) = task.start_after {
        if after > state.now {
            return false;
        }
    }
    task.dependencies.iter().all(|dep| {
        if bundle.completed_task_ids.contains(&dep.predecessor) {
            return true;
        }
        state.scheduled.get(&dep.predecessor).is_some_and(|s| {
            s.end_date + days_to_duration(dep.lag_days) + days_to_duration(1.0) <= state.now
        })
    })
}

pub(crate) fn eligible_tasks<'a>(
    state: &SchedulerState,
    tasks_by_id: &TaskIdMap<&'a Task>,
    bundle: &Bundle,
) -> Vec<&'a Task> {
    state
        .unscheduled
        .iter()
        .filter_map(|id| tasks_by_id.get(id).copied())
        .filter(|t| is_eligible(t, state, bundle))
        .collect()
}

/// The next instant any currently-stuck state could change: the earliest end
/// of a busy interval blocking a leading candidate, the earliest unmet
/// `start_after`/dependency-end+lag among the unscheduled set, or [`None`] if
/// nothing upstream will ever change.
pub(crate) fn next_event(state: &SchedulerState, tasks_by_id: &TaskIdMap<&Task>, bundle: &Bundle) -> Option<DateTime<Utc>> {
    let mut candidates = Vec::new();

    for sched in state.stores.values() {
        if let Some(iv) = sched.intervals().iter().find(|iv| iv.end > state.now) {
            candidates.push(iv.end);
        }
    }

    for id in &state.unscheduled {
        let Some(task) = tasks_by_id.get(id) else { continue };
        if let Some(after) = task.start_after {
            if after > state.now {
                candidates.push(after);
            }
        }
        for dep in &task.dependencies {
            if bundle.completed_task_ids.contains(&dep.predecessor) {
                continue;
            }
            if let Some(sched) = state.scheduled.get(&dep.predecessor) {
                let ready = sched.end_date + days_to_duration(dep.lag_days) + days_to_duration(1.0);
                if ready > state.now {
                    candidates.push(ready);
                }
            }
        }
    }

    candidates.into_iter().filter(|t| *t > state.now).min()
}

pub(crate) fn commit(
    state: &mut SchedulerState,
    task: &Task,
    resources: Vec<ResourceId>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    effective_duration_days: f64,
) {
    let interval = TimeInterval::new(start, end);
    for resource in &resources {
        state
            .stores
            .entry(resource.clone())
            .or_insert_with(|| ResourceSchedule::new(resource.clone(), Vec::new()))
            .insert(interval);
    }
    state.unscheduled.remove(&task.id);
    state.scheduled.insert(
        task.id.clone(),
        ScheduledTask {
            task_id: task.id.clone(),
            start_date: start,
            end_date: end,
            duration_days: effective_duration_days,
            resources,
        },
    );
}

/// Tentatively resolve `task` against `state.stores` without committing
/// anything — used by bounded rollout to see which resources a candidate
/// would claim before deciding whether to let it.
pub(crate) fn tentative_resolve(
    task: &Task,
    state: &SchedulerState,
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
) -> ResolveOutcome {
    resolver::resolve(
        &task.resource_requirement,
        parsed_specs.get(&task.id),
        all_resources,
        groups,
        &state.stores,
        state.now,
        task.duration_days,
    )
}

/// Attempt to resolve and commit `task` at `state.now`, recording any
/// `UnassignedTask`/`DeadlineMissed` warning this produces. Returns whether a
/// commit happened.
pub(crate) fn try_commit(
    task: &Task,
    state: &mut SchedulerState,
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    warnings: &mut Vec<Warning>,
) -> bool {
    match tentative_resolve(task, state, parsed_specs, all_resources, groups) {
        ResolveOutcome::Commit {
            resources,
            start,
            end,
            effective_duration_days,
            fell_back_to_unassigned,
        } => {
            commit(state, task, resources, start, end, effective_duration_days);
            if fell_back_to_unassigned {
                warnings.push(Warning::UnassignedTask { task: task.id.clone() });
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
            true
        }
        ResolveOutcome::Defer => false,
    }
}

/// Run one tick: compute the eligible set, optionally gate the leading
/// candidate through bounded rollout, attempt every eligible task in sort
/// order, and advance `now` if nothing committed. Returns `false` when stuck
/// with tasks still unscheduled and no future event — the caller turns that
/// into [`SchedulingError::UnschedulableResidual`].
#[allow(clippy::too_many_arguments)]
pub(crate) fn tick(
    state: &mut SchedulerState,
    tasks_by_id: &TaskIdMap<&Task>,
    parsed_specs: &TaskIdMap<Spec>,
    bundle: &Bundle,
    all_resources: &[ResourceId],
    enable_rollout: bool,
    warnings: &mut Vec<Warning>,
    rollout_decisions: &mut Vec<RolloutDecision>,
) -> bool {
    let eligible = eligible_tasks(state, tasks_by_id, bundle);
    if eligible.is_empty() {
        return match next_event(state, tasks_by_id, bundle) {
            Some(t) => {
                state.now = t;
                true
            }
            None => false,
        };
    }

    let sorted = sort_by_urgency(
        eligible,
        state.now,
        &bundle.config.strategy,
        bundle.config.preprocessor.default_priority,
        bundle.config.preprocessor.default_cr_multiplier,
        bundle.config.preprocessor.default_cr_floor,
    );

    let mut committed = false;
    let mut iter = sorted.into_iter();
    if let Some(leading) = iter.next() {
        let mut skip_leading = false;
        if enable_rollout {
            if let Some(outcome) = rollout::maybe_trigger(state, tasks_by_id, parsed_specs, bundle, all_resources, leading) {
                skip_leading = outcome.choice == RolloutChoice::Skip;
                rollout_decisions.push(outcome.decision);
            }
        }
        if !skip_leading && try_commit(leading, state, parsed_specs, all_resources, &bundle.groups, warnings) {
            committed = true;
        }
    }
    for task in iter {
        if try_commit(task, state, parsed_specs, all_resources, &bundle.groups, warnings) {
            committed = true;
        }
    }

    if !committed {
        match next_event(state, tasks_by_id, bundle) {
            Some(t) => state.now = t,
            None => return false,
        }
    }
    true
}

/// Run the forward pass, unassisted, from `state` until `horizon` or until
/// stuck — used by bounded-rollout simulation, which never recurses and so
/// always passes `enable_rollout = false`.
pub(crate) fn run_to_horizon(
    mut state: SchedulerState,
    tasks_by_id: &TaskIdMap<&Task>,
    parsed_specs: &TaskIdMap<Spec>,
    bundle: &Bundle,
    all_resources: &[ResourceId],
    horizon: DateTime<Utc>,
) -> SchedulerState {
    let mut warnings = Vec::new();
    let mut rollout_decisions = Vec::new();
    while state.now < horizon && !state.unscheduled.is_empty() {
        if !tick(
            &mut state,
            tasks_by_id,
            parsed_specs,
            bundle,
            all_resources,
            false,
            &mut warnings,
            &mut rollout_decisions,
        ) {
            break;
        }
    }
    state
}

/// Run the Parallel SGS forward pass end to end.
pub fn run(bundle: &Bundle, enable_rollout: bool) -> Result<AlgorithmResult, SchedulingError> {
    let all_resources = bundle.resource_order();
    let parsed_specs = preprocessor::parse_specs(&bundle.tasks, &all_resources, &bundle.groups)?;
    let pre = preprocessor::preprocess(
        &bundle.tasks,
        &bundle.completed_task_ids,
        bundle.config.preprocessor.default_priority,
    )?;

    let mut tasks: Vec<Task> = bundle.tasks.clone();
    for task in tasks.iter_mut() {
        if let Some(deadline) = pre.deadlines.get(&task.id) {
            task.computed_deadline = *deadline;
        }
        if let Some(priority) = pre.priorities.get(&task.id) {
            task.computed_priority = Some(*priority);
        }
    }

    let mut stores = preprocessor::build_initial_stores(bundle);
    let fixed_result = fixed_date::apply(
        &tasks,
        &parsed_specs,
        &all_resources,
        &bundle.groups,
        bundle.current_date,
        &bundle.completed_task_ids,
        &mut stores,
    );

    let tasks_by_id: TaskIdMap<&Task> = tasks.iter().map(|t| (t.id.clone(), t)).collect();

    let mut scheduled: TaskIdMap<ScheduledTask> = TaskIdMap::default();
    for st in &fixed_result.scheduled {
        scheduled.insert(st.task_id.clone(), st.clone());
    }
    let unscheduled: TaskIdSet = tasks
        .iter()
        .filter(|t| !bundle.completed_task_ids.contains(&t.id) && !t.is_fixed())
        .map(|t| t.id.clone())
        .collect();

    let mut state = SchedulerState {
        now: bundle.current_date,
        scheduled,
        unscheduled,
        stores,
    };
    let mut warnings = fixed_result.warnings;
    let mut rollout_decisions = Vec::new();

    while !state.unscheduled.is_empty() {
        if !tick(
            &mut state,
            &tasks_by_id,
            &parsed_specs,
            bundle,
            &all_resources,
            enable_rollout,
            &mut warnings,
            &mut rollout_decisions,
        ) {
            let residual: Vec<TaskId> = state.unscheduled.into_iter().collect();
            return Err(SchedulingError::UnschedulableResidual(residual));
        }
    }

    let mut scheduled: Vec<ScheduledTask> = state.scheduled.into_values().collect();
    scheduled.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.task_id.cmp(&b.task_id)));

    Ok(AlgorithmResult {
        scheduled,
        warnings,
        rollout_decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::SchedulingConfig;
    use crate::data::resource::Resource;
    use crate::data::task::{Dependency, ResourceAllocation, ResourceRequirement};
    use crate::time_interval;
    use either::Either;

    fn task(
        id: &str,
        dur: f64,
        requirement: ResourceRequirement,
        deps: Vec<(&str, f64)>,
        deadline: Option<DateTime<Utc>>,
    ) -> Task {
        Task {
            id: TaskId::from(id),
            duration_days: dur,
            resource_requirement: requirement,
            dependencies: deps
                .into_iter()
                .map(|(p, lag)| Dependency {
                    predecessor: TaskId::from(p),
                    lag_days: lag,
                })
                .collect(),
            priority: None,
            start_after: None,
            end_before: deadline,
            start_on: None,
            end_on: None,
            computed_deadline: None,
            computed_priority: None,
        }
    }

    fn alice_requirement() -> ResourceRequirement {
        Either::Left(vec![ResourceAllocation {
            resource: ResourceId::from("alice"),
            allocation: 1.0,
        }])
    }

    fn single_resource_bundle(tasks: Vec<Task>, today: DateTime<Utc>) -> Bundle {
        Bundle {
            tasks,
            resources: vec![Resource {
                id: ResourceId::from("alice"),
                groups: vec![],
                dns_periods: vec![],
                dns_rules: vec![],
            }],
            groups: Default::default(),
            global_dns_periods: vec![],
            current_date: today,
            completed_task_ids: Default::default(),
            config: SchedulingConfig::default(),
        }
    }

    #[test]
    fn test_two_tasks_same_resource_serialize_by_priority() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let deadline = time_interval! { 1/31/2025 - 2/1/2025 }.start;
        let tasks = vec![
            task("a", 20.0, alice_requirement(), vec![], Some(deadline)),
            task("b", 5.0, alice_requirement(), vec![], Some(deadline)),
        ];
        let bundle = single_resource_bundle(tasks, today);
        let result = run(&bundle, false).unwrap();
        assert_eq!(result.scheduled.len(), 2);
        let a = result.scheduled.iter().find(|t| t.task_id == TaskId::from("a")).unwrap();
        assert_eq!(a.start_date, today);
        assert!(result.scheduled.iter().any(|t| t.task_id == TaskId::from("b") && t.start_date >= a.end_date));
    }

    #[test]
    fn test_dependency_with_lag_delays_successor() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![
            task("design", 3.0, alice_requirement(), vec![], None),
            task("impl", 10.0, alice_requirement(), vec![("design", 7.0)], None),
        ];
        let bundle = single_resource_bundle(tasks, today);
        let result = run(&bundle, false).unwrap();
        let design = result.scheduled.iter().find(|t| t.task_id == TaskId::from("design")).unwrap();
        let imp = result.scheduled.iter().find(|t| t.task_id == TaskId::from("impl")).unwrap();
        assert_eq!(design.start_date, today);
        assert!(imp.start_date >= design.end_date + days_to_duration(7.0 + 1.0));
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![task("impl", 5.0, alice_requirement(), vec![("ghost", 0.0)], None)];
        let bundle = single_resource_bundle(tasks, today);
        assert!(matches!(run(&bundle, false), Err(SchedulingError::UnknownDependency(_, _))));
    }

    #[test]
    fn test_spec_requirement_falls_back_to_unassigned_warning() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![task("orphan", 1.0, Either::Right("ghost_group".to_string()), vec![], None)];
        let bundle = single_resource_bundle(tasks, today);
        let result = run(&bundle, false).unwrap();
        assert!(matches!(result.warnings.as_slice(), [Warning::UnassignedTask { .. }]));
    }

    #[test]
    fn test_completed_task_skips_scheduling() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![task("a", 5.0, alice_requirement(), vec![], None)];
        let mut bundle = single_resource_bundle(tasks, today);
        bundle.completed_task_ids.insert(TaskId::from("a"));
        let result = run(&bundle, false).unwrap();
        assert!(result.scheduled.is_empty());
    }
}
