//! Convergence detection for loop mode
//!
//! Pure functions over quality progressions. The loop controller feeds
//! per-iteration quality and improvement scores in; continuation decisions
//! come out. Nothing here holds state across iterations beyond the metrics
//! struct itself, so sequences can be replayed in tests.

use cadence_core::LoopDefaults;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A registered quality gate, evaluated every iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QualityGate {
    /// Passes when the iteration's quality score meets the threshold
    Threshold { name: String, threshold: f64 },
    /// Passes when the iteration's improvement score meets the threshold
    Improvement { name: String, threshold: f64 },
}

impl QualityGate {
    pub fn name(&self) -> &str {
        match self {
            Self::Threshold { name, .. } | Self::Improvement { name, .. } => name,
        }
    }

    pub fn evaluate(&self, quality: f64, improvement: f64) -> GateResult {
        let (value, threshold) = match self {
            Self::Threshold { threshold, .. } => (quality, *threshold),
            Self::Improvement { threshold, .. } => (improvement, *threshold),
        };
        GateResult {
            name: self.name().to_string(),
            passed: value >= threshold,
            value,
            threshold,
        }
    }
}

/// Pass/fail record for one gate on one iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
}

/// Gates registered on every loop unless the caller overrides them
pub fn default_gates() -> Vec<QualityGate> {
    vec![
        QualityGate::Threshold {
            name: "minimum_quality".to_string(),
            threshold: 0.7,
        },
        QualityGate::Improvement {
            name: "improvement_rate".to_string(),
            threshold: 0.05,
        },
    ]
}

/// Why a loop stopped scheduling iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Convergence confidence crossed its threshold
    Converged,
    /// Quality reached the plateau threshold
    Plateau,
    /// Improvement over the stability window fell below the floor
    Stagnation,
    /// Iteration cap reached
    MaxIterations,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Plateau => write!(f, "plateau"),
            Self::Stagnation => write!(f, "stagnation"),
            Self::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// Running convergence state for one loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergenceMetrics {
    pub quality_progression: Vec<f64>,
    pub improvement_rates: Vec<f64>,
    /// 1 − variance of the trailing quality scores
    pub stability_indicator: f64,
    /// Blend of stability and how settled the improvement rates are
    pub convergence_confidence: f64,
    /// Latest quality minus the previous one
    pub quality_trend: f64,
}

impl ConvergenceMetrics {
    /// Fold in one iteration's quality and improvement scores
    pub fn update(&mut self, quality: f64, improvement: f64, window: usize) {
        let previous = self.quality_progression.last().copied();
        self.quality_progression.push(quality);
        self.improvement_rates.push(improvement);
        self.quality_trend = previous.map(|p| quality - p).unwrap_or(0.0);

        let tail = trailing(&self.quality_progression, window);
        self.stability_indicator = (1.0 - variance(tail)).clamp(0.0, 1.0);

        let recent_rates = trailing(&self.improvement_rates, window);
        let avg_rate = mean(recent_rates);
        // Settled improvement rates (near zero) raise confidence
        let settledness = 1.0 - (10.0 * avg_rate.abs()).min(1.0);
        self.convergence_confidence =
            (0.6 * self.stability_indicator + 0.4 * settledness).clamp(0.0, 1.0);
    }

    pub fn latest_quality(&self) -> Option<f64> {
        self.quality_progression.last().copied()
    }
}

/// Decide whether the loop should stop after the latest iteration.
///
/// Stagnation only fires once a full stability window of iterations has
/// accumulated; early iterations never stagnate.
pub fn evaluate_continuation(
    metrics: &ConvergenceMetrics,
    iteration_number: u32,
    max_iterations: u32,
    defaults: &LoopDefaults,
) -> Option<TerminationReason> {
    if metrics.convergence_confidence >= defaults.convergence_confidence_threshold {
        return Some(TerminationReason::Converged);
    }
    if metrics
        .latest_quality()
        .map(|q| q >= defaults.quality_plateau_threshold)
        .unwrap_or(false)
    {
        return Some(TerminationReason::Plateau);
    }
    if metrics.improvement_rates.len() >= defaults.stability_window {
        let window_sum: f64 = trailing(&metrics.improvement_rates, defaults.stability_window)
            .iter()
            .sum();
        if window_sum < defaults.quality_improvement_threshold {
            return Some(TerminationReason::Stagnation);
        }
    }
    if iteration_number >= max_iterations {
        return Some(TerminationReason::MaxIterations);
    }
    None
}

fn trailing(values: &[f64], window: usize) -> &[f64] {
    let start = values.len().saturating_sub(window);
    &values[start..]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}
