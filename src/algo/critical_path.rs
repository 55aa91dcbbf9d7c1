//! Target-driven critical-path scheduler.
//!
//! Instead of scoring a task by its own priority and slack (as
//! `crate::algo::sort_key` does), every task is scored by the tightest
//! deadline among the targets downstream of it: `target_score = (target's
//! priority / its upstream chain's total effort) * urgency`, where `urgency`
//! decays with the target's slack the same way `sort_key`'s ATC urgency
//! does. A task feeding no target falls back to a derived default urgency,
//! with its own priority entering only as a WSPT tiebreak. Each tick,
//! candidates are further restricted to whichever unscheduled predecessors
//! currently sit on a target's bottleneck chain — a sibling branch feeding
//! the same target but not on that chain has slack to spare and waits.

use either::Either;
use rustc_hash::FxHashMap;

use crate::algo::interval_store::{days_to_duration, duration_to_days};
use crate::algo::math::Graph;
use crate::algo::resolver::{self, ResolveOutcome, unassigned_resource_id};
use crate::algo::sgs::{self, SchedulerState};
use crate::algo::{fixed_date, preprocessor};
use crate::algo::{AlgorithmResult, ScheduledTask, SchedulingError, Warning};
use crate::data::bundle::Bundle;
use crate::data::config::CriticalPathConfig;
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{Task, TaskId, TaskIdMap, TaskIdSet};
use chrono::{DateTime, Utc};

const MIN_CHAIN_EFFORT_DAYS: f64 = 1e-6;
/// Horizon for the gated resource-choice rollout's one-off lookahead.
const ROLLOUT_HORIZON_DAYS: f64 = 30.0;

/// Every deadline-bearing task's own deadline, priority, and its upstream
/// critical chain's total duration (including the target itself).
#[derive(Debug, Clone, Copy)]
struct Target {
    deadline: DateTime<Utc>,
    priority: f64,
    chain_effort_days: f64,
}

/// Build a graph whose adjacency from a task is its immediate predecessors,
/// so a breadth-first walk from a target accumulates every task standing
/// upstream of it.
fn predecessor_graph(tasks: &[Task]) -> Graph<TaskId> {
    Graph::from_forward(tasks.iter().map(|t| {
        (
            t.id.clone(),
            t.dependencies.iter().map(|d| d.predecessor.clone()).collect::<Vec<_>>(),
        )
    }))
    .expect("a non-empty vertex iterator always builds a graph")
}

/// For every task with a stated deadline (a "target"), walk its upstream
/// critical chain and record that target against every task standing on it
/// (the target itself included). A task feeding more than one target keeps
/// all of them — [`task_urgency`] picks the tightest live one each tick.
fn targets_by_task(
    tasks: &[Task],
    graph: &Graph<TaskId>,
    tasks_by_id: &TaskIdMap<&Task>,
    default_priority: u8,
) -> TaskIdMap<Vec<Target>> {
    let mut by_task: TaskIdMap<Vec<Target>> = TaskIdMap::default();
    for task in tasks {
        let Some(deadline) = task.end_before.or(task.end_on) else {
            continue;
        };
        let priority = f64::from(task.computed_priority.or(task.priority).unwrap_or(default_priority));
        let ancestors: Vec<TaskId> = graph.bfs([task.id.clone()]).collect();
        let chain_effort_days = ancestors
            .iter()
            .filter_map(|id| tasks_by_id.get(id))
            .map(|t| t.duration_days)
            .sum::<f64>()
            .max(MIN_CHAIN_EFFORT_DAYS);
        let target = Target {
            deadline,
            priority,
            chain_effort_days,
        };
        for id in ancestors {
            by_task.entry(id).or_default().push(target);
        }
    }
    by_task
}

/// `target_score = (priority / total_upstream_effort) * urgency`, where
/// `urgency` decays the same way `sort_key`'s ATC urgency does, scaled by
/// the chain's average effort rather than the task's own duration — the
/// tightest-feeding, highest-priority target wins.
fn target_urgency(target: &Target, now: DateTime<Utc>, k: f64, avg_chain_effort: f64) -> f64 {
    let slack = duration_to_days(target.deadline - now);
    let effort = target.chain_effort_days.max(MIN_CHAIN_EFFORT_DAYS);
    let urgency = (-slack.max(0.0) / (k * avg_chain_effort.max(MIN_CHAIN_EFFORT_DAYS))).exp();
    (target.priority / effort) * urgency
}

fn task_best_urgency(task_id: &TaskId, targets: &TaskIdMap<Vec<Target>>, now: DateTime<Utc>, k: f64, avg_chain_effort: f64) -> Option<f64> {
    targets
        .get(task_id)?
        .iter()
        .map(|t| target_urgency(t, now, k, avg_chain_effort))
        .fold(None, |acc, u| Some(acc.map_or(u, |a: f64| a.max(u))))
}

fn wspt_weight(task: &Task, default_priority: u8) -> f64 {
    let priority = f64::from(task.computed_priority.or(task.priority).unwrap_or(default_priority));
    priority / task.duration_days.max(MIN_CHAIN_EFFORT_DAYS)
}

/// Walk backward from `target_id` through whichever unscheduled predecessor
/// carries the most duration at each step (the bottleneck), stopping once
/// the target itself is scheduled or no unscheduled predecessor remains.
/// This is the target's zero-slack chain: any delay along it delays the
/// target, whereas a sibling predecessor not on this chain has slack to
/// spare relative to the bottleneck.
fn critical_chain(target_id: &TaskId, tasks_by_id: &TaskIdMap<&Task>, unscheduled: &TaskIdSet) -> Vec<TaskId> {
    let mut chain = Vec::new();
    let mut current = target_id.clone();
    loop {
        if !unscheduled.contains(&current) {
            break;
        }
        chain.push(current.clone());
        let Some(task) = tasks_by_id.get(&current) else { break };
        let next = task
            .dependencies
            .iter()
            .filter(|d| unscheduled.contains(&d.predecessor))
            .filter_map(|d| tasks_by_id.get(&d.predecessor).map(|t| (t.duration_days, t.id.clone())))
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        match next {
            Some((_, id)) => current = id,
            None => break,
        }
    }
    chain
}

/// Union of every live target's zero-slack chain, over currently
/// unscheduled tasks. A target already scheduled contributes nothing (its
/// own upstream chain must already be done too).
fn critical_chain_union(target_task_ids: &[TaskId], tasks_by_id: &TaskIdMap<&Task>, unscheduled: &TaskIdSet) -> TaskIdSet {
    target_task_ids
        .iter()
        .filter(|id| unscheduled.contains(*id))
        .flat_map(|id| critical_chain(id, tasks_by_id, unscheduled))
        .collect()
}

/// Order eligible tasks by target urgency (most urgent first), breaking
/// ties with WSPT (highest priority-per-day first) and finally task id.
///
/// `eligible` must already be restricted to tasks lying on some target's
/// critical chain, or to tasks feeding no target at all — see
/// [`critical_chain_union`] and its use in [`run`].
fn sort_by_target_urgency<'a>(
    eligible: Vec<&'a Task>,
    now: DateTime<Utc>,
    targets: &TaskIdMap<Vec<Target>>,
    avg_chain_effort: f64,
    cfg: &CriticalPathConfig,
    default_priority: u8,
) -> Vec<&'a Task> {
    let min_urgency = eligible
        .iter()
        .filter_map(|t| task_best_urgency(&t.id, targets, now, cfg.k, avg_chain_effort))
        .fold(f64::INFINITY, f64::min);
    let default_urgency = if min_urgency.is_finite() {
        (min_urgency * cfg.no_deadline_urgency_multiplier).max(cfg.urgency_floor)
    } else {
        cfg.urgency_floor
    };

    let mut keyed: Vec<(f64, f64, &Task)> = eligible
        .into_iter()
        .map(|t| {
            let urgency = task_best_urgency(&t.id, targets, now, cfg.k, avg_chain_effort).unwrap_or(default_urgency);
            (-urgency, -wspt_weight(t, default_priority), t)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)).then_with(|| a.2.id.cmp(&b.2.id)));
    keyed.into_iter().map(|(_, _, t)| t).collect()
}

/// Weighted tardiness across every known target, read from `state` at
/// whatever point the simulation stopped — a target whose chain hasn't
/// reached it yet by then is simply not counted (it never got worse, it got
/// deferred past the lookahead).
fn total_target_tardiness(state: &SchedulerState, target_task_ids: &[TaskId], tasks_by_id: &TaskIdMap<&Task>, default_priority: u8) -> f64 {
    target_task_ids
        .iter()
        .filter_map(|id| {
            let sched = state.scheduled.get(id)?;
            let task = tasks_by_id.get(id)?;
            let deadline = task.end_before.or(task.end_on)?;
            let late = duration_to_days((sched.end_date - deadline).max(chrono::TimeDelta::zero()));
            let priority = f64::from(task.computed_priority.or(task.priority).unwrap_or(default_priority));
            Some(late * priority)
        })
        .sum()
}

/// When two resource candidates complete within `rollout_score_ratio_threshold`
/// of each other, simulate committing `task` on each and keep whichever
/// leaves the lighter total tardiness across every known target by a short
/// horizon — rather than always taking the nominally-fastest candidate.
#[allow(clippy::too_many_arguments)]
fn pick_better_candidate(
    task: &Task,
    winner: (ResourceId, DateTime<Utc>),
    runner_up: (ResourceId, DateTime<Utc>),
    state: &SchedulerState,
    tasks_by_id: &TaskIdMap<&Task>,
    parsed_specs: &TaskIdMap<Spec>,
    bundle: &Bundle,
    all_resources: &[ResourceId],
    target_task_ids: &[TaskId],
) -> (ResourceId, DateTime<Utc>) {
    let horizon = state.now + days_to_duration(ROLLOUT_HORIZON_DAYS);
    let default_priority = bundle.config.preprocessor.default_priority;

    let score_for = |candidate: &ResourceId, end: DateTime<Utc>| -> f64 {
        let mut sim = state.clone();
        sgs::commit(&mut sim, task, vec![candidate.clone()], state.now, end, task.duration_days);
        let sim = sgs::run_to_horizon(sim, tasks_by_id, parsed_specs, bundle, all_resources, horizon);
        -total_target_tardiness(&sim, target_task_ids, tasks_by_id, default_priority)
    };

    let winner_score = score_for(&winner.0, winner.1);
    let runner_up_score = score_for(&runner_up.0, runner_up.1);
    if runner_up_score > winner_score { runner_up } else { winner }
}

#[allow(clippy::too_many_arguments)]
fn resolve_for_critical_path(
    task: &Task,
    state: &SchedulerState,
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    bundle: &Bundle,
    tasks_by_id: &TaskIdMap<&Task>,
    target_task_ids: &[TaskId],
) -> ResolveOutcome {
    let Either::Right(_) = &task.resource_requirement else {
        return resolver::resolve(&task.resource_requirement, None, all_resources, groups, &state.stores, state.now, task.duration_days);
    };
    let spec = parsed_specs.get(&task.id).expect("spec requirement must have a parsed Spec by resolve time");
    let candidates = spec.expand(all_resources, groups);
    if candidates.is_empty() {
        return ResolveOutcome::Commit {
            resources: vec![unassigned_resource_id()],
            start: state.now,
            end: state.now,
            effective_duration_days: task.duration_days,
            fell_back_to_unassigned: true,
        };
    }

    let effort = days_to_duration(task.duration_days);
    let mut ranked: Vec<(ResourceId, DateTime<Utc>)> = candidates
        .iter()
        .filter_map(|c| state.stores.get(c).map(|s| (c.clone(), s.completion_time(state.now, effort))))
        .collect();
    ranked.sort_by_key(|(_, end)| *end);
    let Some(mut winner) = ranked.first().cloned() else {
        return ResolveOutcome::Defer;
    };

    let cfg = &bundle.config.critical_path;
    if cfg.rollout_enabled {
        if let Some(runner_up) = ranked.get(1).cloned() {
            let winner_span = duration_to_days(winner.1 - state.now).max(MIN_CHAIN_EFFORT_DAYS);
            let runner_span = duration_to_days(runner_up.1 - state.now).max(MIN_CHAIN_EFFORT_DAYS);
            if runner_span / winner_span <= cfg.rollout_score_ratio_threshold {
                winner = pick_better_candidate(
                    task,
                    winner,
                    runner_up,
                    state,
                    tasks_by_id,
                    parsed_specs,
                    bundle,
                    all_resources,
                    target_task_ids,
                );
            }
        }
    }

    let winner_sched = &state.stores[&winner.0];
    let start = winner_sched.next_free_instant(state.now);
    if start > state.now {
        return ResolveOutcome::Defer;
    }
    ResolveOutcome::Commit {
        resources: vec![winner.0],
        start,
        end: winner.1,
        effective_duration_days: task.duration_days,
        fell_back_to_unassigned: false,
    }
}

#[allow(clippy::too_many_arguments)]
fn try_commit(
    task: &Task,
    state: &mut SchedulerState,
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    bundle: &Bundle,
    tasks_by_id: &TaskIdMap<&Task>,
    target_task_ids: &[TaskId],
    warnings: &mut Vec<Warning>,
) -> bool {
    match resolve_for_critical_path(task, state, parsed_specs, all_resources, groups, bundle, tasks_by_id, target_task_ids) {
        ResolveOutcome::Commit {
            resources,
            start,
            end,
            effective_duration_days,
            fell_back_to_unassigned,
        } => {
            sgs::commit(state, task, resources, start, end, effective_duration_days);
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

/// Run the critical-path scheduler end to end.
pub fn run(bundle: &Bundle) -> Result<AlgorithmResult, SchedulingError> {
    let all_resources = bundle.resource_order();
    let parsed_specs = preprocessor::parse_specs(&bundle.tasks, &all_resources, &bundle.groups)?;
    let pre = preprocessor::preprocess(
        &bundle.tasks,
        &bundle.completed_task_ids,
        bundle.config.preprocessor.default_priority,
    )?;

    let mut tasks: Vec<Task> = bundle.tasks.clone();
    for task in tasks.iter_mut() {
        if let Some(priority) = pre.priorities.get(&task.id) {
            task.computed_priority = Some(*priority);
        }
    }

    let tasks_by_id: TaskIdMap<&Task> = tasks.iter().map(|t| (t.id.clone(), t)).collect();
    let graph = predecessor_graph(&tasks);
    let targets = targets_by_task(&tasks, &graph, &tasks_by_id, bundle.config.preprocessor.default_priority);
    let target_task_ids: Vec<TaskId> = tasks.iter().filter(|t| t.end_before.or(t.end_on).is_some()).map(|t| t.id.clone()).collect();
    let all_chain_efforts: Vec<f64> = targets.values().flatten().map(|t| t.chain_effort_days).collect();
    let avg_chain_effort = if all_chain_efforts.is_empty() {
        MIN_CHAIN_EFFORT_DAYS
    } else {
        all_chain_efforts.iter().sum::<f64>() / all_chain_efforts.len() as f64
    };

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

    let mut scheduled: TaskIdMap<ScheduledTask> = TaskIdMap::default();
    for st in &fixed_result.scheduled {
        scheduled.insert(st.task_id.clone(), st.clone());
    }
    let unscheduled: crate::data::task::TaskIdSet = tasks
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

    loop {
        if state.unscheduled.is_empty() {
            break;
        }
        let eligible = sgs::eligible_tasks(&state, &tasks_by_id, bundle);
        if eligible.is_empty() {
            match sgs::next_event(&state, &tasks_by_id, bundle) {
                Some(t) => {
                    state.now = t;
                    continue;
                }
                None => {
                    let residual: Vec<TaskId> = state.unscheduled.into_iter().collect();
                    return Err(SchedulingError::UnschedulableResidual(residual));
                }
            }
        }

        // Restrict candidates to whichever unscheduled predecessors sit on a
        // live target's bottleneck chain this tick; a task feeding no target
        // at all is never excluded by this step. Fall back to the full
        // eligible set if the filter would empty it out (e.g. no targets
        // exist yet, or every feeder is momentarily between chains).
        let critical = critical_chain_union(&target_task_ids, &tasks_by_id, &state.unscheduled);
        let restricted: Vec<&Task> = eligible
            .iter()
            .copied()
            .filter(|t| !targets.contains_key(&t.id) || critical.contains(&t.id))
            .collect();
        let candidates = if restricted.is_empty() { eligible } else { restricted };

        let sorted = sort_by_target_urgency(
            candidates,
            state.now,
            &targets,
            avg_chain_effort,
            &bundle.config.critical_path,
            bundle.config.preprocessor.default_priority,
        );

        let mut committed = false;
        for task in sorted {
            if try_commit(
                task,
                &mut state,
                &parsed_specs,
                &all_resources,
                &bundle.groups,
                bundle,
                &tasks_by_id,
                &target_task_ids,
                &mut warnings,
            ) {
                committed = true;
            }
        }

        if !committed {
            match sgs::next_event(&state, &tasks_by_id, bundle) {
                Some(t) => state.now = t,
                None => {
                    let residual: Vec<TaskId> = state.unscheduled.into_iter().collect();
                    return Err(SchedulingError::UnschedulableResidual(residual));
                }
            }
        }
    }

    let mut scheduled: Vec<ScheduledTask> = state.scheduled.into_values().collect();
    scheduled.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.task_id.cmp(&b.task_id)));

    Ok(AlgorithmResult {
        scheduled,
        warnings,
        rollout_decisions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::SchedulingConfig;
    use crate::data::resource::Resource;
    use crate::data::task::{Dependency, ResourceAllocation, ResourceRequirement};
    use crate::time_interval;

    fn task(
        id: &str,
        dur: f64,
        priority: Option<u8>,
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
            priority,
            start_after: None,
            end_before: deadline,
            start_on: None,
            end_on: None,
            computed_deadline: None,
            computed_priority: None,
        }
    }

    fn requirement(resource: &str) -> ResourceRequirement {
        Either::Left(vec![ResourceAllocation {
            resource: ResourceId::from(resource),
            allocation: 1.0,
        }])
    }

    fn bundle(tasks: Vec<Task>, resources: Vec<&str>, today: DateTime<Utc>) -> Bundle {
        Bundle {
            tasks,
            resources: resources
                .into_iter()
                .map(|id| Resource {
                    id: ResourceId::from(id),
                    groups: vec![],
                    dns_periods: vec![],
                    dns_rules: vec![],
                })
                .collect(),
            groups: Default::default(),
            global_dns_periods: vec![],
            current_date: today,
            completed_task_ids: Default::default(),
            config: SchedulingConfig::default(),
        }
    }

    #[test]
    fn test_chain_feeding_tight_target_runs_before_unrelated_high_priority_task() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tight_deadline = time_interval! { 1/10/2025 - 1/11/2025 }.start;
        let tasks = vec![
            task("feeds_target", 3.0, Some(10), requirement("alice"), vec![], None),
            task("target", 2.0, Some(10), requirement("alice"), vec![("feeds_target", 0.0)], Some(tight_deadline)),
            task("unrelated_high_priority", 3.0, Some(99), requirement("alice"), vec![], None),
        ];
        let b = bundle(tasks, vec!["alice"], today);
        let result = run(&b).unwrap();
        let feeds = result.scheduled.iter().find(|t| t.task_id == TaskId::from("feeds_target")).unwrap();
        assert_eq!(feeds.start_date, today);
    }

    #[test]
    fn test_missing_deadline_tasks_use_default_urgency() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![
            task("a", 5.0, Some(50), requirement("alice"), vec![], None),
            task("b", 5.0, Some(50), requirement("alice"), vec![], None),
        ];
        let b = bundle(tasks, vec!["alice"], today);
        let result = run(&b).unwrap();
        assert_eq!(result.scheduled.len(), 2);
    }

    #[test]
    fn test_unknown_dependency_is_fatal() {
        let today = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let tasks = vec![task("a", 1.0, None, requirement("alice"), vec![("ghost", 0.0)], None)];
        let b = bundle(tasks, vec!["alice"], today);
        assert!(matches!(run(&b), Err(SchedulingError::UnknownDependency(_, _))));
    }
}
