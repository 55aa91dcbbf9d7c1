//! Per-tick urgency scoring.
//!
//! Every strategy is uniformized into one [`SortKey`] tuple
//! `(primary, tiebreak, id)`, so the forward pass never needs to know which
//! strategy
//! produced it. Lower sorts first, i.e. more urgent.

use std::cmp::Ordering;

use crate::algo::interval_store::duration_to_days;
use crate::data::config::{Strategy, StrategyConfig};
use crate::data::task::{Task, TaskId};
use chrono::{DateTime, Utc};

/// The smallest duration a task is allowed to contribute to a CR
/// denominator, avoiding division by zero for milestones (`duration_days == 0`).
const MIN_DURATION_DAYS: f64 = 1e-6;

/// A total, deterministic order over eligible tasks at one tick.
#[derive(Debug, Clone)]
pub struct SortKey {
    /// The strategy's primary scalar. Lower is more urgent.
    pub primary: f64,
    /// The strategy's tiebreak scalar, consulted when `primary` ties.
    pub tiebreak: f64,
    /// Final tiebreak: task id, for total determinism.
    pub id: TaskId,
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .total_cmp(&other.primary)
            .then_with(|| self.tiebreak.total_cmp(&other.tiebreak))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Critical ratio: `slack / duration`. Smaller is more urgent.
pub(crate) fn critical_ratio(task: &Task, now: DateTime<Utc>) -> Option<f64> {
    let deadline = task.computed_deadline?;
    let slack = duration_to_days(deadline - now);
    let dur = task.duration_days.max(MIN_DURATION_DAYS);
    Some(slack / dur)
}

pub(crate) fn effective_priority(task: &Task, default_priority: u8) -> u8 {
    task.computed_priority
        .or(task.priority)
        .unwrap_or(default_priority)
}

fn atc_urgency(task: &Task, now: DateTime<Utc>, k: f64, avg_dur: f64) -> Option<f64> {
    let deadline = task.computed_deadline?;
    let slack = duration_to_days(deadline - now);
    let dur = task.duration_days.max(MIN_DURATION_DAYS);
    let priority = f64::from(effective_priority(task, 50));
    Some((priority / dur) * (-slack.max(0.0) / (k * avg_dur.max(MIN_DURATION_DAYS))).exp())
}

/// Compute sort keys for every eligible task under the configured strategy.
///
/// `eligible` and `default_priority` come from the preprocessor/bundle;
/// `preprocessor_default_cr_multiplier`/`floor` are threaded in explicitly
/// because they live in `PreprocessorConfig`, not `StrategyConfig`.
pub fn compute_sort_keys(
    eligible: &[&Task],
    now: DateTime<Utc>,
    cfg: &StrategyConfig,
    default_priority: u8,
    default_cr_multiplier: f64,
    default_cr_floor: f64,
) -> Vec<SortKey> {
    let fallback_cr = {
        let max_cr = eligible
            .iter()
            .filter_map(|t| critical_ratio(t, now))
            .fold(0.0_f64, f64::max);
        (max_cr * default_cr_multiplier).max(default_cr_floor)
    };

    let avg_dur = if eligible.is_empty() {
        MIN_DURATION_DAYS
    } else {
        eligible.iter().map(|t| t.duration_days).sum::<f64>() / eligible.len() as f64
    };

    let min_deadline_urgency = eligible
        .iter()
        .filter_map(|t| atc_urgency(t, now, cfg.atc_k, avg_dur))
        .fold(f64::INFINITY, f64::min);
    let default_urgency = if min_deadline_urgency.is_finite() {
        (min_deadline_urgency * cfg.atc_default_urgency_multiplier).max(cfg.atc_default_urgency_floor)
    } else {
        cfg.atc_default_urgency_floor
    };

    eligible
        .iter()
        .map(|task| {
            let priority = f64::from(effective_priority(task, default_priority));
            let cr = critical_ratio(task, now).unwrap_or(fallback_cr);
            match cfg.strategy {
                Strategy::Weighted => SortKey {
                    primary: cfg.cr_weight * cr + cfg.priority_weight * (100.0 - priority),
                    tiebreak: 0.0,
                    id: task.id.clone(),
                },
                Strategy::CrFirst => SortKey {
                    primary: cr,
                    tiebreak: -priority,
                    id: task.id.clone(),
                },
                Strategy::PriorityFirst => SortKey {
                    primary: -priority,
                    tiebreak: cr,
                    id: task.id.clone(),
                },
                Strategy::Atc => {
                    let urgency = atc_urgency(task, now, cfg.atc_k, avg_dur).unwrap_or(default_urgency);
                    SortKey {
                        primary: -urgency,
                        tiebreak: 0.0,
                        id: task.id.clone(),
                    }
                }
            }
        })
        .collect()
}

/// Sort a slice of tasks by their computed keys, stably (ties keep input
/// order before the final id tiebreak applies).
pub fn sort_by_urgency<'a>(
    eligible: Vec<&'a Task>,
    now: DateTime<Utc>,
    cfg: &StrategyConfig,
    default_priority: u8,
    default_cr_multiplier: f64,
    default_cr_floor: f64,
) -> Vec<&'a Task> {
    let keys = compute_sort_keys(
        &eligible,
        now,
        cfg,
        default_priority,
        default_cr_multiplier,
        default_cr_floor,
    );
    let mut paired: Vec<(SortKey, &Task)> = keys.into_iter().zip(eligible).collect();
    paired.sort_by(|a, b| a.0.cmp(&b.0));
    paired.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::task::{Dependency, ResourceRequirement};
    use either::Either;

    fn task(id: &str, priority: u8, dur: f64, deadline: Option<DateTime<Utc>>) -> Task {
        Task {
            id: TaskId::from(id),
            duration_days: dur,
            resource_requirement: ResourceRequirement::Right("*".to_string()),
            dependencies: Vec::<Dependency>::new(),
            priority: Some(priority),
            start_after: None,
            end_before: None,
            start_on: None,
            end_on: None,
            computed_deadline: deadline,
            computed_priority: Some(priority),
        }
    }

    #[test]
    fn test_priority_first_orders_by_priority_descending() {
        let now = Utc::now();
        let low = task("low", 10, 5.0, None);
        let high = task("high", 90, 5.0, None);
        let cfg = StrategyConfig {
            strategy: Strategy::PriorityFirst,
            ..Default::default()
        };
        let sorted = sort_by_urgency(vec![&low, &high], now, &cfg, 50, 1.5, 1.0);
        assert_eq!(sorted[0].id, TaskId::from("high"));
        assert_eq!(sorted[1].id, TaskId::from("low"));
    }

    #[test]
    fn test_cr_first_orders_by_slack_ratio() {
        let now = Utc::now();
        let urgent = task("urgent", 50, 5.0, Some(now + chrono::Duration::days(2)));
        let relaxed = task("relaxed", 50, 5.0, Some(now + chrono::Duration::days(50)));
        let cfg = StrategyConfig {
            strategy: Strategy::CrFirst,
            ..Default::default()
        };
        let sorted = sort_by_urgency(vec![&relaxed, &urgent], now, &cfg, 50, 1.5, 1.0);
        assert_eq!(sorted[0].id, TaskId::from("urgent"));
    }

    #[test]
    fn test_ties_break_by_id() {
        let now = Utc::now();
        let a = task("b-task", 50, 5.0, None);
        let b = task("a-task", 50, 5.0, None);
        let cfg = StrategyConfig::default();
        let sorted = sort_by_urgency(vec![&a, &b], now, &cfg, 50, 1.5, 1.0);
        assert_eq!(sorted[0].id, TaskId::from("a-task"));
    }
}
