//! Performance tracking for the orchestration engines
//!
//! Engines report coordination latencies, delegation efficiency, loop
//! progression, chain handoffs, and system-level resource usage. The
//! tracker aggregates them into a report and directional trends.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Direction of a metric over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// One observation in a metric series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A named series plus the direction in which larger values are better
#[derive(Debug, Clone, Default)]
struct MetricSeries {
    samples: Vec<MetricSample>,
    higher_is_better: bool,
}

impl MetricSeries {
    fn push(&mut self, value: f64) {
        self.samples.push(MetricSample {
            timestamp: Utc::now(),
            value,
        });
    }
}

/// Summary report across all recorded series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Blended score in [0, 1]
    pub overall_score: f64,
    pub recommendations: Vec<String>,
    /// Mean value per series
    pub series_means: HashMap<String, f64>,
}

/// Collects engine performance metrics
pub struct PerformanceTracker {
    series: Arc<RwLock<HashMap<String, MetricSeries>>>,
    total_records: AtomicU64,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            total_records: AtomicU64::new(0),
        }
    }

    async fn record(&self, name: &str, value: f64, higher_is_better: bool) {
        self.total_records.fetch_add(1, Ordering::Relaxed);
        let mut series = self.series.write().await;
        let entry = series.entry(name.to_string()).or_insert_with(|| MetricSeries {
            samples: Vec::new(),
            higher_is_better,
        });
        entry.push(value);
        debug!("Recorded {} = {}", name, value);
    }

    /// Time taken to coordinate one wave end to end
    pub async fn record_wave_coordination(&self, wave_id: &str, ms: u64) {
        debug!("Wave {} coordinated in {}ms", wave_id, ms);
        self.record("wave_coordination_ms", ms as f64, false).await;
    }

    /// Delegation outcome: sub-agent count, runtime, headline efficiency
    pub async fn record_delegation_performance(
        &self,
        delegation_id: &str,
        sub_agent_count: usize,
        exec_ms: u64,
        efficiency: f64,
    ) {
        debug!(
            "Delegation {} finished: {} agents, {}ms, efficiency {:.2}",
            delegation_id, sub_agent_count, exec_ms, efficiency
        );
        self.record("delegation_exec_ms", exec_ms as f64, false).await;
        self.record("delegation_efficiency", efficiency, true).await;
        self.record("delegation_sub_agents", sub_agent_count as f64, true)
            .await;
    }

    /// One loop iteration's quality and improvement
    pub async fn record_loop_iteration(&self, loop_id: &str, quality: f64, improvement: f64) {
        debug!(
            "Loop {} iteration: quality {:.3}, improvement {:.3}",
            loop_id, quality, improvement
        );
        self.record("loop_quality", quality, true).await;
        self.record("loop_improvement", improvement, true).await;
    }

    /// Loop completion: total iterations and final quality
    pub async fn record_loop_completion(&self, loop_id: &str, iterations: u32, final_quality: f64) {
        debug!(
            "Loop {} completed after {} iterations at quality {:.3}",
            loop_id, iterations, final_quality
        );
        self.record("loop_iterations", iterations as f64, false).await;
        self.record("loop_final_quality", final_quality, true).await;
    }

    /// One chain handoff's latency and context fidelity
    pub async fn record_chain_handoff(&self, chain_id: &str, ms: u64, fidelity: f64) {
        debug!(
            "Chain {} handoff: {}ms, fidelity {:.2}",
            chain_id, ms, fidelity
        );
        self.record("chain_handoff_ms", ms as f64, false).await;
        self.record("chain_fidelity", fidelity, true).await;
    }

    /// Chain completion with blended quality
    pub async fn record_chain_completion(&self, chain_id: &str, quality: f64) {
        debug!("Chain {} completed at quality {:.3}", chain_id, quality);
        self.record("chain_quality", quality, true).await;
    }

    /// System-level snapshot: overall resource pressure and active executions
    pub async fn record_system_metrics(&self, resource_pressure: f64, active_executions: usize) {
        self.record("system_pressure", resource_pressure, false).await;
        self.record("system_active", active_executions as f64, true)
            .await;
    }

    /// Total records accepted since creation
    pub fn record_count(&self) -> u64 {
        self.total_records.load(Ordering::Relaxed)
    }

    /// Blend the quality-like series into one report
    pub async fn generate_report(&self) -> PerformanceReport {
        let series = self.series.read().await;

        let mut series_means = HashMap::new();
        let mut quality_values = Vec::new();

        for (name, s) in series.iter() {
            if s.samples.is_empty() {
                continue;
            }
            let mean = s.samples.iter().map(|x| x.value).sum::<f64>() / s.samples.len() as f64;
            series_means.insert(name.clone(), mean);

            // Only [0,1]-scaled quality series contribute to the score
            if s.higher_is_better && s.samples.iter().all(|x| (0.0..=1.0).contains(&x.value)) {
                quality_values.push(mean);
            }
        }

        let overall_score = if quality_values.is_empty() {
            0.0
        } else {
            quality_values.iter().sum::<f64>() / quality_values.len() as f64
        };

        let mut recommendations = Vec::new();
        if let Some(eff) = series_means.get("delegation_efficiency") {
            if *eff < 0.4 {
                recommendations
                    .push("Delegation efficiency below 0.4; reduce decomposition overhead".into());
            }
        }
        if let Some(pressure) = series_means.get("system_pressure") {
            if *pressure > 0.8 {
                recommendations.push("Sustained resource pressure; raise pool capacity".into());
            }
        }
        if overall_score < 0.6 && !quality_values.is_empty() {
            recommendations.push("Overall quality below 0.6; review strategy selection".into());
        }

        PerformanceReport {
            overall_score,
            recommendations,
            series_means,
        }
    }

    /// Directional trend per series over the trailing window.
    ///
    /// Compares the first-half average against the second-half average;
    /// a change greater than 10% is directional, otherwise stable.
    pub async fn trends(&self, window_ms: i64) -> HashMap<String, Trend> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms);
        let series = self.series.read().await;

        let mut result = HashMap::new();
        for (name, s) in series.iter() {
            let windowed: Vec<f64> = s
                .samples
                .iter()
                .filter(|x| x.timestamp >= cutoff)
                .map(|x| x.value)
                .collect();
            if windowed.len() < 2 {
                result.insert(name.clone(), Trend::Stable);
                continue;
            }

            let mid = windowed.len() / 2;
            let first = windowed[..mid].iter().sum::<f64>() / mid as f64;
            let second = windowed[mid..].iter().sum::<f64>() / (windowed.len() - mid) as f64;

            let trend = if first.abs() < f64::EPSILON {
                Trend::Stable
            } else {
                let change = (second - first) / first.abs();
                if change.abs() <= 0.10 {
                    Trend::Stable
                } else if (change > 0.0) == s.higher_is_better {
                    Trend::Improving
                } else {
                    Trend::Degrading
                }
            };
            result.insert(name.clone(), trend);
        }
        result
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_blends_quality_series() {
        let tracker = PerformanceTracker::new();
        tracker.record_loop_iteration("loop-1", 0.8, 0.1).await;
        tracker.record_chain_completion("chain-1", 0.6).await;

        let report = tracker.generate_report().await;
        assert!(report.overall_score > 0.0);
        assert!(report.series_means.contains_key("loop_quality"));
    }

    #[tokio::test]
    async fn test_low_efficiency_recommendation() {
        let tracker = PerformanceTracker::new();
        tracker
            .record_delegation_performance("del-1", 4, 120_000, 0.3)
            .await;

        let report = tracker.generate_report().await;
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("efficiency")));
    }

    #[tokio::test]
    async fn test_trend_improving_quality() {
        let tracker = PerformanceTracker::new();
        for quality in [0.5, 0.5, 0.8, 0.9] {
            tracker.record_loop_iteration("loop-1", quality, 0.0).await;
        }

        let trends = tracker.trends(60_000).await;
        assert_eq!(trends.get("loop_quality"), Some(&Trend::Improving));
    }

    #[tokio::test]
    async fn test_trend_degrading_latency() {
        let tracker = PerformanceTracker::new();
        for ms in [100u64, 110, 300, 320] {
            tracker.record_wave_coordination("wave-1", ms).await;
        }

        let trends = tracker.trends(60_000).await;
        assert_eq!(trends.get("wave_coordination_ms"), Some(&Trend::Degrading));
    }

    #[tokio::test]
    async fn test_trend_stable_within_ten_percent() {
        let tracker = PerformanceTracker::new();
        for quality in [0.80, 0.81, 0.82, 0.83] {
            tracker.record_loop_iteration("loop-1", quality, 0.0).await;
        }

        let trends = tracker.trends(60_000).await;
        assert_eq!(trends.get("loop_quality"), Some(&Trend::Stable));
    }

    #[tokio::test]
    async fn test_record_count() {
        let tracker = PerformanceTracker::new();
        tracker.record_wave_coordination("wave-1", 50).await;
        tracker.record_chain_handoff("chain-1", 5, 1.0).await;
        assert_eq!(tracker.record_count(), 3);
    }
}
