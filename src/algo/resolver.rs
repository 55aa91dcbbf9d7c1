//! Auto-assignment resolver.
//!
//! Turns a task's [`ResourceRequirement`] into a concrete commit decision at
//! one instant `now`: either an explicit set of resources (all required
//! simultaneously) or a [`Spec`] expanded into a candidate list, the fastest-
//! completing candidate winning ties by candidate order.

use chrono::{DateTime, Utc};
use either::Either;
use rustc_hash::FxHashMap;

use crate::algo::interval_store::{ResourceSchedule, days_to_duration};
use crate::data::interval::TimeInterval;
use crate::data::resource::ResourceId;
use crate::data::spec::Spec;
use crate::data::task::{ResourceAllocation, ResourceRequirement};

/// The shared pseudo-resource that serializes any task whose spec expands
/// to no live candidate.
pub fn unassigned_resource_id() -> ResourceId {
    ResourceId::from("__unassigned__")
}

/// What the resolver decided for one task at one tick.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// Commit now: claim `resources` over `[start, end)`.
    Commit {
        /// Concrete resources claimed (already expanded/deduped).
        resources: Vec<ResourceId>,
        /// Start instant — always equal to the `now` the resolver was
        /// called with; otherwise the outcome is [`ResolveOutcome::Defer`].
        start: DateTime<Utc>,
        /// End instant accounting for DNS interruption.
        end: DateTime<Utc>,
        /// Effort-adjusted duration: `duration_days` divided by total
        /// allocation (1.0 for a single spec-resolved resource).
        effective_duration_days: f64,
        /// Whether this landed on the unassigned pseudo-resource, i.e. the
        /// spec's candidate set was empty (surfaces as an `UnassignedTask`
        /// warning upstream).
        fell_back_to_unassigned: bool,
    },
    /// The best candidate can't start exactly at `now`; try again next tick
    /// rather than consuming a resource out of order.
    Defer,
}

fn virtual_schedule(resources: &[ResourceId], stores: &FxHashMap<ResourceId, ResourceSchedule>) -> ResourceSchedule {
    let merged: Vec<TimeInterval> = resources
        .iter()
        .filter_map(|r| stores.get(r))
        .flat_map(|s| s.intervals().to_vec())
        .collect();
    ResourceSchedule::new(ResourceId::from("__virtual__"), merged)
}

fn resolve_explicit(
    allocations: &[ResourceAllocation],
    stores: &FxHashMap<ResourceId, ResourceSchedule>,
    now: DateTime<Utc>,
    duration_days: f64,
) -> ResolveOutcome {
    let resources: Vec<ResourceId> = allocations.iter().map(|a| a.resource.clone()).collect();
    let total_allocation: f64 = allocations.iter().map(|a| a.allocation).sum::<f64>().max(1e-9);
    let effort_days = duration_days / total_allocation;

    // Unlike spec-based resolution, an explicit set's start is simply the
    // first moment all named resources are simultaneously free — it is
    // never deferred, since there is no alternative candidate to
    // reconsider at the next tick.
    let virt = virtual_schedule(&resources, stores);
    let start = virt.next_free_instant(now);
    let end = virt.completion_time(start, days_to_duration(effort_days));
    ResolveOutcome::Commit {
        resources,
        start,
        end,
        effective_duration_days: effort_days,
        fell_back_to_unassigned: false,
    }
}

fn resolve_spec(
    spec: &Spec,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    stores: &FxHashMap<ResourceId, ResourceSchedule>,
    now: DateTime<Utc>,
    duration_days: f64,
) -> ResolveOutcome {
    let candidates = spec.expand(all_resources, groups);
    let (candidates, fell_back_to_unassigned) = if candidates.is_empty() {
        (vec![unassigned_resource_id()], true)
    } else {
        (candidates, false)
    };

    let effort = days_to_duration(duration_days);
    let mut best: Option<(DateTime<Utc>, &ResourceId)> = None;
    for candidate in &candidates {
        let Some(sched) = stores.get(candidate) else {
            continue;
        };
        let completion = sched.completion_time(now, effort);
        if best.is_none_or(|(best_completion, _)| completion < best_completion) {
            best = Some((completion, candidate));
        }
    }

    let Some((end, winner)) = best else {
        return ResolveOutcome::Defer;
    };
    let winner_sched = &stores[winner];
    let start = winner_sched.next_free_instant(now);
    if start > now {
        return ResolveOutcome::Defer;
    }

    ResolveOutcome::Commit {
        resources: vec![winner.clone()],
        start,
        end,
        effective_duration_days: duration_days,
        fell_back_to_unassigned,
    }
}

/// Resolve a task's resource requirement at `now`.
///
/// `parsed_spec` is the already-parsed AST for the spec variant (parsing
/// happens once, up front — see `crate::data::spec::Spec::parse`).
pub fn resolve(
    requirement: &ResourceRequirement,
    parsed_spec: Option<&Spec>,
    all_resources: &[ResourceId],
    groups: &FxHashMap<String, Vec<ResourceId>>,
    stores: &FxHashMap<ResourceId, ResourceSchedule>,
    now: DateTime<Utc>,
    duration_days: f64,
) -> ResolveOutcome {
    match requirement {
        Either::Left(allocations) => resolve_explicit(allocations, stores, now, duration_days),
        Either::Right(_) => {
            let spec = parsed_spec.expect("spec requirement must have a parsed Spec by resolve time");
            resolve_spec(spec, all_resources, groups, stores, now, duration_days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_interval;

    fn stores_with(entries: Vec<(&str, Vec<TimeInterval>)>) -> FxHashMap<ResourceId, ResourceSchedule> {
        entries
            .into_iter()
            .map(|(id, dns)| (ResourceId::from(id), ResourceSchedule::new(ResourceId::from(id), dns)))
            .collect()
    }

    #[test]
    fn test_spec_picks_faster_completing_candidate() {
        // a busy until 1/10, b free now; spec a|b, dur=5d -> b wins.
        let mut stores = stores_with(vec![("a", vec![]), ("b", vec![])]);
        stores
            .get_mut(&ResourceId::from("a"))
            .unwrap()
            .insert(time_interval! { 1/1/2025 - 1/10/2025 });

        let spec = Spec::parse("a|b", &FxHashMap::default()).unwrap();
        let now = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let all = vec![ResourceId::from("a"), ResourceId::from("b")];

        let outcome = resolve_spec(&spec, &all, &FxHashMap::default(), &stores, now, 5.0);
        match outcome {
            ResolveOutcome::Commit { resources, end, .. } => {
                assert_eq!(resources, vec![ResourceId::from("b")]);
                assert_eq!(end, time_interval! { 1/6/2025 - 1/7/2025 }.start);
            }
            ResolveOutcome::Defer => panic!("expected a commit"),
        }
    }

    #[test]
    fn test_empty_candidates_falls_back_to_unassigned() {
        let stores = stores_with(vec![(unassigned_resource_id().as_str(), vec![])]);
        let spec = Spec::Group("nonexistent".to_string());
        let now = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        let outcome = resolve_spec(&spec, &[], &FxHashMap::default(), &stores, now, 2.0);
        match outcome {
            ResolveOutcome::Commit {
                fell_back_to_unassigned,
                resources,
                ..
            } => {
                assert!(fell_back_to_unassigned);
                assert_eq!(resources, vec![unassigned_resource_id()]);
            }
            ResolveOutcome::Defer => panic!("expected a commit"),
        }
    }

    #[test]
    fn test_busy_winner_at_now_defers() {
        let mut stores = stores_with(vec![("a", vec![])]);
        stores
            .get_mut(&ResourceId::from("a"))
            .unwrap()
            .insert(time_interval! { 1/1/2025 - 1/5/2025 });
        let spec = Spec::Named(ResourceId::from("a"));
        let now = time_interval! { 1/2/2025 - 1/3/2025 }.start;
        let outcome = resolve_spec(&spec, &[ResourceId::from("a")], &FxHashMap::default(), &stores, now, 2.0);
        assert!(matches!(outcome, ResolveOutcome::Defer));
    }

    #[test]
    fn test_explicit_set_requires_all_simultaneously_free() {
        let mut stores = stores_with(vec![("alice", vec![]), ("bob", vec![])]);
        stores
            .get_mut(&ResourceId::from("bob"))
            .unwrap()
            .insert(time_interval! { 1/1/2025 - 1/3/2025 });

        let allocations = vec![
            ResourceAllocation {
                resource: ResourceId::from("alice"),
                allocation: 1.0,
            },
            ResourceAllocation {
                resource: ResourceId::from("bob"),
                allocation: 1.0,
            },
        ];
        let now = time_interval! { 1/1/2025 - 1/2/2025 }.start;
        // duration_days=4, split across 2 fully-allocated resources -> 2
        // effort days once both are free, starting 1/3 (bob's DNS ends then).
        let outcome = resolve_explicit(&allocations, &stores, now, 4.0);
        match outcome {
            ResolveOutcome::Commit { start, end, .. } => {
                assert_eq!(start, time_interval! { 1/3/2025 - 1/4/2025 }.start);
                assert_eq!(end, time_interval! { 1/5/2025 - 1/6/2025 }.start);
            }
            ResolveOutcome::Defer => panic!("expected a commit"),
        }
    }
}
