//! Backward pass: topological order, then deadline/priority propagation
//! over lagged dependency edges.

use daggy::Dag;
use either::Either;
use petgraph::visit::{Topo, Walker};
use rustc_hash::FxHashMap;

use crate::algo::SchedulingError;
use crate::algo::interval_store::{ResourceSchedule, days_to_duration};
use crate::data::bundle::Bundle;
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{Task, TaskId, TaskIdMap, TaskIdSet};
use chrono::{DateTime, Utc};

/// Topologically order the still-pending tasks (ancestors before
/// descendants), ignoring edges into already-`completed` tasks.
///
/// Fails with [`SchedulingError::CycleDetected`] if the dependency graph
/// (restricted to pending tasks) isn't a DAG, or
/// [`SchedulingError::UnknownDependency`] if a dependency names a task that
/// is neither pending nor completed.
pub fn topo_order<'a>(
    tasks: &'a [Task],
    completed: &TaskIdSet,
) -> Result<Vec<&'a Task>, SchedulingError> {
    let pending: Vec<&Task> = tasks.iter().filter(|t| !completed.contains(&t.id)).collect();
    let index_of: FxHashMap<&TaskId, u32> = pending
        .iter()
        .enumerate()
        .map(|(i, t)| (&t.id, i as u32))
        .collect();

    let mut dag: Dag<&Task, ()> = Dag::with_capacity(
        pending.len(),
        pending.iter().map(|t| t.dependencies.len()).sum(),
    );
    for task in &pending {
        dag.add_node(*task);
    }

    for (i, task) in pending.iter().enumerate() {
        for dep in &task.dependencies {
            if completed.contains(&dep.predecessor) {
                continue;
            }
            let Some(&j) = index_of.get(&dep.predecessor) else {
                return Err(SchedulingError::UnknownDependency(
                    task.id.clone(),
                    dep.predecessor.clone(),
                ));
            };
            dag.add_edge(j.into(), (i as u32).into(), ()).map_err(|_| {
                SchedulingError::CycleDetected(vec![(dep.predecessor.clone(), task.id.clone())])
            })?;
        }
    }

    Ok(Topo::new(&dag).iter(&dag).map(|idx| dag[idx]).collect())
}

/// Output of the backward pass: every pending task's computed deadline
/// (`None` if it has none, directly or transitively) and computed priority.
#[derive(Debug, Clone, Default)]
pub struct PreprocessResult {
    /// `task_id -> computed_deadline`.
    pub deadlines: TaskIdMap<Option<DateTime<Utc>>>,
    /// `task_id -> computed_priority`.
    pub priorities: TaskIdMap<u8>,
}

/// Run the backward pass.
pub fn preprocess(
    tasks: &[Task],
    completed: &TaskIdSet,
    default_priority: u8,
) -> Result<PreprocessResult, SchedulingError> {
    let order = topo_order(tasks, completed)?;

    let mut deadlines: TaskIdMap<Option<DateTime<Utc>>> = TaskIdMap::default();
    let mut priorities: TaskIdMap<u8> = TaskIdMap::default();
    for task in &order {
        deadlines.insert(task.id.clone(), task.end_on.or(task.end_before));
        priorities.insert(task.id.clone(), task.effective_priority(default_priority));
    }

    // Reverse topological order: descendants are visited before their
    // predecessors, so a deadline only ever propagates upstream once it is
    // itself final.
    for task in order.iter().rev() {
        let Some(task_deadline) = deadlines.get(&task.id).copied().flatten() else {
            continue;
        };
        for dep in &task.dependencies {
            if completed.contains(&dep.predecessor) {
                continue;
            }
            let proposed = task_deadline
                - days_to_duration(task.duration_days)
                - days_to_duration(dep.lag_days);
            let entry = deadlines.entry(dep.predecessor.clone()).or_insert(None);
            *entry = Some(entry.map_or(proposed, |existing| existing.min(proposed)));
        }
    }

    Ok(PreprocessResult {
        deadlines,
        priorities,
    })
}

/// Parse every spec-variant [`ResourceRequirement`](crate::data::task::ResourceRequirement)
/// exactly once, validating it against the bundle's declared resources and
/// groups, raising `UnknownResource`/`UnknownGroup` here, at setup, rather
/// than per-tick during resolver expansion.
pub fn parse_specs(
    tasks: &[Task],
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
) -> Result<TaskIdMap<Spec>, SchedulingError> {
    use rustc_hash::FxHashSet;
    let known_resources: FxHashSet<ResourceId> = all_resources.iter().cloned().collect();

    let mut parsed = TaskIdMap::default();
    for task in tasks {
        let Either::Right(text) = &task.resource_requirement else {
            continue;
        };
        let spec = Spec::parse(text, groups).map_err(|_| SchedulingError::UnknownResource(
            task.id.clone(),
            ResourceId::from(text.as_str()),
        ))?;
        spec.validate(&known_resources, groups).map_err(|e| match e {
            crate::data::spec::SpecValidateError::UnknownResource(id) => {
                SchedulingError::UnknownResource(task.id.clone(), id)
            }
            crate::data::spec::SpecValidateError::UnknownGroup(name) => {
                SchedulingError::UnknownGroup(task.id.clone(), name)
            }
        })?;
        parsed.insert(task.id.clone(), spec);
    }
    Ok(parsed)
}

/// Build each resource's initial [`ResourceSchedule`], merging its literal
/// DNS periods, its materialized recurring rules, and the bundle's global
/// DNS periods into one sorted view.
pub fn build_initial_stores(bundle: &Bundle) -> FxHashMap<ResourceId, ResourceSchedule> {
    let horizon = materialization_horizon(bundle);
    bundle
        .resources
        .iter()
        .map(|resource| {
            let mut periods = resource.dns_periods.clone();
            periods.extend(bundle.global_dns_periods.iter().cloned());
            for rule in &resource.dns_rules {
                periods.extend(rule.materialize(horizon));
            }
            (resource.id.clone(), ResourceSchedule::new(resource.id.clone(), periods))
        })
        .collect()
}

/// How far out to materialize recurring DNS rules: far enough to cover
/// every stated deadline/fixed date, with a generous floor so permanent
/// rules with no stated horizon still terminate.
fn materialization_horizon(bundle: &Bundle) -> DateTime<Utc> {
    let floor = bundle.current_date + days_to_duration(3650.0);
    bundle
        .tasks
        .iter()
        .flat_map(|t| [t.end_before, t.end_on, t.start_on])
        .flatten()
        .fold(floor, |acc, d| acc.max(d))
}
