//! Tunables for the scheduling algorithms.
//!
//! All of this flows through one explicit [`SchedulingConfig`] value — there
//! is no global mutable configuration state anywhere in `crate::algo`.

use serde::{Deserialize, Serialize};

use crate::data::task::DEFAULT_PRIORITY;

/// Which sort-key strategy the forward pass uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `score = cr_weight * CR + priority_weight * (100 - priority)`.
    #[default]
    Weighted,
    /// Tuple `(CR, -priority, id)`.
    CrFirst,
    /// Tuple `(-priority, CR, id)`.
    PriorityFirst,
    /// Apparent Tardiness Cost.
    Atc,
}

/// Preprocessor tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Priority assigned to a task that doesn't state its own.
    pub default_priority: u8,
    /// Multiplier applied to the eligible set's maximum CR to get the
    /// default CR for tasks without a computed deadline.
    pub default_cr_multiplier: f64,
    /// Floor under the computed default CR.
    pub default_cr_floor: f64,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            default_cr_multiplier: 1.5,
            default_cr_floor: 1.0,
        }
    }
}

/// Sort-key tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Which strategy to score eligible tasks with.
    pub strategy: Strategy,
    /// `weighted` strategy: weight on critical ratio.
    pub cr_weight: f64,
    /// `weighted` strategy: weight on `(100 - priority)`.
    pub priority_weight: f64,
    /// `atc` strategy: decay constant `K`.
    pub atc_k: f64,
    /// `atc` strategy: multiplier for `default_urgency` when no deadline
    /// tasks exist to derive it from.
    pub atc_default_urgency_multiplier: f64,
    /// `atc` strategy: floor under `default_urgency`.
    pub atc_default_urgency_floor: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            cr_weight: 1.0,
            priority_weight: 1.0,
            atc_k: 2.0,
            atc_default_urgency_multiplier: 0.5,
            atc_default_urgency_floor: 0.01,
        }
    }
}

/// Bounded rollout tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// A leading candidate is "relaxed" if its priority is below this.
    pub priority_threshold: u8,
    /// Minimum priority gap for a competitor to count as "more urgent".
    pub min_priority_gap: u8,
    /// A leading candidate is "relaxed" if its CR is above this.
    pub cr_relaxed_threshold: f64,
    /// Minimum CR gap (in the competitor's favor) to count as "more urgent".
    pub min_cr_urgency_gap: f64,
    /// Upper bound on the simulation horizon, regardless of the candidate's
    /// effective duration. [`None`] means unbounded.
    pub max_horizon_days: Option<f64>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            priority_threshold: 70,
            min_priority_gap: 20,
            cr_relaxed_threshold: 2.0,
            min_cr_urgency_gap: 1.0,
            max_horizon_days: Some(30.0),
        }
    }
}

/// Critical-path scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalPathConfig {
    /// Decay constant for target urgency, mirrors [`StrategyConfig::atc_k`].
    pub k: f64,
    /// Multiplier applied to the minimum deadline urgency to get the
    /// default urgency for no-deadline targets.
    pub no_deadline_urgency_multiplier: f64,
    /// Floor under computed target urgency.
    pub urgency_floor: f64,
    /// Whether resource-choice rollout runs at all. A single
    /// consistent code path either always runs it or never does — see
    /// DESIGN.md, Open Question 1.
    pub rollout_enabled: bool,
    /// Resource-choice rollout only swaps candidates when the runner-up's
    /// score is within this ratio of the leader's.
    pub rollout_score_ratio_threshold: f64,
}

impl Default for CriticalPathConfig {
    fn default() -> Self {
        Self {
            k: 2.0,
            no_deadline_urgency_multiplier: 0.5,
            urgency_floor: 0.01,
            rollout_enabled: false,
            rollout_score_ratio_threshold: 1.1,
        }
    }
}

/// Top-level configuration for a [`schedule`](crate::algo::schedule) run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Preprocessor tunables.
    pub preprocessor: PreprocessorConfig,
    /// Sort-key tunables.
    pub strategy: StrategyConfig,
    /// Rollout tunables.
    pub rollout: RolloutConfig,
    /// Critical-path tunables.
    pub critical_path: CriticalPathConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let cfg = SchedulingConfig::default();
        assert_eq!(cfg.preprocessor.default_priority, 50);
        assert_eq!(cfg.strategy.strategy, Strategy::Weighted);
        assert_eq!(cfg.rollout.priority_threshold, 70);
        assert!(!cfg.critical_path.rollout_enabled);
    }

    #[test]
    fn test_round_trips_through_json() {
        let cfg = SchedulingConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SchedulingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_missing_fields_fall_back_to_default() {
        let cfg: SchedulingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SchedulingConfig::default());
    }
}
