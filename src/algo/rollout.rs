//! Bounded rollout: a drop-in replacement for the forward pass's per-tick
//! commit decision on the leading candidate. When the leading task is
//! "relaxed" (low priority, slack in hand) and a more urgent task is
//! waiting in the wings for the same resource, simulate both committing the
//! leader now and skipping it for one tick, run each scenario forward to a
//! bounded horizon, and keep whichever scores better.

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;

use crate::algo::interval_store::{days_to_duration, duration_to_days};
use crate::algo::resolver::ResolveOutcome;
use crate::algo::sgs::{self, SchedulerState};
use crate::algo::sort_key::{critical_ratio, effective_priority};
use crate::algo::{RolloutChoice, RolloutDecision};
use crate::data::bundle::Bundle;
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{Task, TaskId, TaskIdMap};

/// Result of a triggered bounded-rollout check.
pub(crate) struct TriggerOutcome {
    pub choice: RolloutChoice,
    pub decision: RolloutDecision,
}

/// Which concrete resources `task` would claim right now, read-only.
fn candidate_resources(
    task: &Task,
    state: &SchedulerState,
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
) -> Option<Vec<ResourceId>> {
    match sgs::tentative_resolve(task, state, parsed_specs, all_resources, groups) {
        ResolveOutcome::Commit { resources, .. } => Some(resources),
        ResolveOutcome::Defer => None,
    }
}

/// Whether `task`'s resource requirement could ever draw from `resources`.
fn requirement_overlaps(
    task: &Task,
    resources: &[ResourceId],
    parsed_specs: &TaskIdMap<Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
) -> bool {
    use either::Either;
    match &task.resource_requirement {
        Either::Left(allocations) => allocations.iter().any(|a| resources.contains(&a.resource)),
        Either::Right(_) => {
            let Some(spec) = parsed_specs.get(&task.id) else {
                return false;
            };
            let candidates = spec.expand(all_resources, groups);
            candidates.iter().any(|c| resources.contains(c))
        }
    }
}

/// Find the most urgent unscheduled task (other than `leading`) that would
/// compete with it for the same resource and is due to become eligible
/// within the simulation horizon.
fn find_competing<'a>(
    leading: &Task,
    leading_resources: &[ResourceId],
    horizon: DateTime<Utc>,
    state: &SchedulerState,
    tasks_by_id: &TaskIdMap<&'a Task>,
    parsed_specs: &TaskIdMap<Spec>,
    bundle: &Bundle,
    all_resources: &[ResourceId],
) -> Option<&'a Task> {
    let leading_priority = f64::from(effective_priority(leading, bundle.config.preprocessor.default_priority));
    let leading_cr = critical_ratio(leading, state.now);
    let gap = bundle.config.rollout.min_priority_gap;
    let cr_gap = bundle.config.rollout.min_cr_urgency_gap;

    let mut best: Option<(&Task, f64)> = None;
    for id in &state.unscheduled {
        if *id == leading.id {
            continue;
        }
        let Some(candidate) = tasks_by_id.get(id).copied() else { continue };
        if let Some(after) = candidate.start_after {
            if after > horizon {
                continue;
            }
        }
        if !requirement_overlaps(candidate, leading_resources, parsed_specs, all_resources, &bundle.groups) {
            continue;
        }

        let candidate_priority = f64::from(effective_priority(candidate, bundle.config.preprocessor.default_priority));
        let candidate_cr = critical_ratio(candidate, state.now);
        let more_urgent_by_priority = candidate_priority >= leading_priority + f64::from(gap);
        let more_urgent_by_cr = match (candidate_cr, leading_cr) {
            (Some(c), Some(l)) => c + cr_gap <= l,
            (Some(_), None) => true,
            _ => false,
        };
        if !more_urgent_by_priority && !more_urgent_by_cr {
            continue;
        }

        let urgency_score = candidate_priority - candidate_cr.unwrap_or(0.0);
        if best.is_none_or(|(_, s)| urgency_score > s) {
            best = Some((candidate, urgency_score));
        }
    }
    best.map(|(t, _)| t)
}

/// The smallest effort a still-unscheduled task is allowed to contribute to
/// a urgency-multiplier denominator.
const MIN_EFFORT_DAYS: f64 = 1e-6;

/// Score `{leading, competing}` in the simulated `state`, lower is better:
/// for a task scheduled by `horizon`, `start_offset_days · priority/100`
/// (offset measured from `sim_start`, the tick `now` the trigger fired at)
/// plus tardiness `10 · priority · max(0, end − deadline)`; for a task still
/// unscheduled at `horizon`, `delay · (priority/100) · urgency_mult` plus
/// expected tardiness `10 · priority · max(0, horizon + own_effort −
/// deadline)`, where `urgency_mult` decays the same way `sort_key`'s ATC
/// urgency does and `delay` is the whole simulated window the task sat
/// unscheduled.
fn score(
    state: &SchedulerState,
    sim_start: DateTime<Utc>,
    horizon: DateTime<Utc>,
    ids: [&TaskId; 2],
    tasks_by_id: &TaskIdMap<&Task>,
    default_priority: u8,
    atc_k: f64,
) -> f64 {
    let mut total = 0.0;
    for id in ids {
        let Some(task) = tasks_by_id.get(id) else { continue };
        let priority = f64::from(effective_priority(task, default_priority));
        let deadline = task.computed_deadline.or(task.end_before);

        match state.scheduled.get(id) {
            Some(sched) => {
                let start_offset_days = duration_to_days(sched.start_date - sim_start);
                total += start_offset_days * (priority / 100.0);
                if let Some(deadline) = deadline {
                    let late = duration_to_days((sched.end_date - deadline).max(TimeDelta::zero()));
                    total += 10.0 * priority * late;
                }
            }
            None => {
                let own_effort = task.duration_days.max(MIN_EFFORT_DAYS);
                let delay_days = duration_to_days(horizon - sim_start);
                let urgency_mult = match deadline {
                    Some(deadline) => {
                        let slack = duration_to_days(deadline - horizon);
                        (-slack.max(0.0) / (atc_k * own_effort)).exp()
                    }
                    None => 1.0,
                };
                total += delay_days * (priority / 100.0) * urgency_mult;
                if let Some(deadline) = deadline {
                    let overrun = duration_to_days(horizon + days_to_duration(own_effort) - deadline).max(0.0);
                    total += 10.0 * priority * overrun;
                }
            }
        }
    }
    total
}

/// Check whether bounded rollout should override the forward pass's default
/// commit-now decision for `leading`. Returns [`None`] when the trigger
/// condition doesn't hold — the caller should fall back to an ordinary
/// commit attempt.
pub(crate) fn maybe_trigger<'a>(
    state: &SchedulerState,
    tasks_by_id: &TaskIdMap<&'a Task>,
    parsed_specs: &TaskIdMap<Spec>,
    bundle: &Bundle,
    all_resources: &[ResourceId],
    leading: &'a Task,
) -> Option<TriggerOutcome> {
    let cfg = &bundle.config.rollout;
    let leading_priority = effective_priority(leading, bundle.config.preprocessor.default_priority);
    let leading_cr = critical_ratio(leading, state.now);
    let relaxed = leading_priority < cfg.priority_threshold
        && leading_cr.is_none_or(|cr| cr > cfg.cr_relaxed_threshold);
    if !relaxed {
        return None;
    }

    let leading_resources = candidate_resources(leading, state, parsed_specs, all_resources, &bundle.groups)?;
    // Horizon = now + effective_duration(leading), capped by `max_horizon_days`.
    let horizon_days = cfg
        .max_horizon_days
        .map_or(leading.duration_days, |cap| leading.duration_days.min(cap))
        .max(MIN_EFFORT_DAYS);
    let horizon = state.now + days_to_duration(horizon_days);

    let competing = find_competing(
        leading,
        &leading_resources,
        horizon,
        state,
        tasks_by_id,
        parsed_specs,
        bundle,
        all_resources,
    )?;

    let mut commit_state = state.clone();
    let mut warnings = Vec::new();
    sgs::try_commit(leading, &mut commit_state, parsed_specs, all_resources, &bundle.groups, &mut warnings);
    let commit_state = sgs::run_to_horizon(commit_state, tasks_by_id, parsed_specs, bundle, all_resources, horizon);

    let mut skip_state = state.clone();
    skip_state.unscheduled.remove(&leading.id);
    let mut skip_warnings = Vec::new();
    let mut skip_decisions = Vec::new();
    sgs::tick(
        &mut skip_state,
        tasks_by_id,
        parsed_specs,
        bundle,
        all_resources,
        false,
        &mut skip_warnings,
        &mut skip_decisions,
    );
    skip_state.unscheduled.insert(leading.id.clone());
    let skip_state = sgs::run_to_horizon(skip_state, tasks_by_id, parsed_specs, bundle, all_resources, horizon);

    let default_priority = bundle.config.preprocessor.default_priority;
    let atc_k = bundle.config.strategy.atc_k;
    let ids = [&leading.id, &competing.id];
    let sim_start = state.now;
    let commit_score = score(&commit_state, sim_start, horizon, ids, tasks_by_id, default_priority, atc_k);
    let skip_score = score(&skip_state, sim_start, horizon, ids, tasks_by_id, default_priority, atc_k);

    // Lower is better: pick whichever scenario accrues less weighted delay/tardiness.
    let choice = if skip_score < commit_score {
        RolloutChoice::Skip
    } else {
        RolloutChoice::Commit
    };

    Some(TriggerOutcome {
        choice,
        decision: RolloutDecision {
            task: leading.id.clone(),
            choice,
            competing: competing.id.clone(),
            commit_score,
            skip_score,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::interval_store::ResourceSchedule;
    use crate::algo::sgs::SchedulerState;
    use crate::data::config::{RolloutConfig, SchedulingConfig};
    use crate::data::resource::Resource;
    use crate::data::task::{Dependency, ResourceAllocation, ResourceRequirement, TaskIdSet};
    use crate::time_interval;
    use either::Either;

    fn requirement(resource: &str) -> ResourceRequirement {
        Either::Left(vec![ResourceAllocation {
            resource: ResourceId::from(resource),
            allocation: 1.0,
        }])
    }

    fn task(
        id: &str,
        dur: f64,
        priority: u8,
        deadline: Option<DateTime<Utc>>,
        requirement: ResourceRequirement,
    ) -> Task {
        Task {
            id: TaskId::from(id),
            duration_days: dur,
            resource_requirement: requirement,
            dependencies: Vec::<Dependency>::new(),
            priority: Some(priority),
            start_after: None,
            end_before: deadline,
            start_on: None,
            end_on: None,
            computed_deadline: deadline,
            computed_priority: Some(priority),
        }
    }

    #[test]
    fn test_relaxed_leader_with_urgent_competitor_triggers_skip() {
        let now = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let soon_deadline = time_interval! { 1/3/2025 - 1/4/2025 }.start;
        let leading = task("relaxed", 5.0, 10, None, requirement("alice"));
        let competing = task("urgent", 1.0, 95, Some(soon_deadline), requirement("alice"));

        let mut bundle = Bundle {
            tasks: vec![leading.clone(), competing.clone()],
            resources: vec![Resource {
                id: ResourceId::from("alice"),
                groups: vec![],
                dns_periods: vec![],
                dns_rules: vec![],
            }],
            groups: Default::default(),
            global_dns_periods: vec![],
            current_date: now,
            completed_task_ids: Default::default(),
            config: SchedulingConfig::default(),
        };
        bundle.config.rollout = RolloutConfig {
            priority_threshold: 70,
            min_priority_gap: 20,
            cr_relaxed_threshold: 2.0,
            min_cr_urgency_gap: 1.0,
            max_horizon_days: Some(30.0),
        };

        let tasks_by_id: TaskIdMap<&Task> = bundle.tasks.iter().map(|t| (t.id.clone(), t)).collect();
        let mut unscheduled = TaskIdSet::default();
        unscheduled.insert(leading.id.clone());
        unscheduled.insert(competing.id.clone());
        let state = SchedulerState {
            now,
            scheduled: TaskIdMap::default(),
            unscheduled,
            stores: [(ResourceId::from("alice"), ResourceSchedule::new(ResourceId::from("alice"), vec![]))]
                .into_iter()
                .collect(),
        };

        let outcome = maybe_trigger(
            &state,
            &tasks_by_id,
            &TaskIdMap::default(),
            &bundle,
            &[ResourceId::from("alice")],
            &leading,
        );
        let outcome = outcome.expect("relaxed leader with an overlapping urgent competitor should trigger");
        assert_eq!(outcome.choice, RolloutChoice::Skip);
        assert_eq!(outcome.decision.competing, TaskId::from("urgent"));
    }

    #[test]
    fn test_urgent_leader_never_triggers() {
        let now = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let leading = task("urgent", 5.0, 95, None, requirement("alice"));
        let bundle = Bundle {
            tasks: vec![leading.clone()],
            resources: vec![Resource {
                id: ResourceId::from("alice"),
                groups: vec![],
                dns_periods: vec![],
                dns_rules: vec![],
            }],
            groups: Default::default(),
            global_dns_periods: vec![],
            current_date: now,
            completed_task_ids: Default::default(),
            config: SchedulingConfig::default(),
        };
        let tasks_by_id: TaskIdMap<&Task> = bundle.tasks.iter().map(|t| (t.id.clone(), t)).collect();
        let mut unscheduled = TaskIdSet::default();
        unscheduled.insert(leading.id.clone());
        let state = SchedulerState {
            now,
            scheduled: TaskIdMap::default(),
            unscheduled,
            stores: [(ResourceId::from("alice"), ResourceSchedule::new(ResourceId::from("alice"), vec![]))]
                .into_iter()
                .collect(),
        };
        let outcome = maybe_trigger(
            &state,
            &tasks_by_id,
            &TaskIdMap::default(),
            &bundle,
            &[ResourceId::from("alice")],
            &leading,
        );
        assert!(outcome.is_none());
    }
}
