//! Pluggable work strategies
//!
//! The kernel never computes persona or sub-agent "work" itself. It calls
//! through the traits here, and production wires in real execution. The
//! defaults are deterministic so engine behavior is reproducible in tests.

use async_trait::async_trait;
use cadence_core::{ExecutionContext, Finding, LoopMode, Result, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::manager::SubAgent;
use crate::task::SubTask;

/// Output of one unit of persona or sub-agent work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkOutput {
    /// Structured outputs merged into the running context
    pub output: HashMap<String, Value>,
    /// Quality score in [0, 1]
    pub quality: f64,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    /// Validation criteria this work satisfied
    pub criteria_met: Vec<String>,
}

/// Executes one participant's share of a wave phase or one chain link
#[async_trait]
pub trait PersonaWorker: Send + Sync {
    /// Run `operation` as `persona` against the accumulated context
    async fn execute(
        &self,
        persona: &str,
        operation: &str,
        criteria: &[String],
        context: &ExecutionContext,
    ) -> Result<WorkOutput>;
}

/// Executes one delegation sub-task with a specialized sub-agent
#[async_trait]
pub trait WorkSimulator: Send + Sync {
    async fn run_sub_task(
        &self,
        agent: &SubAgent,
        task: &SubTask,
        context: &ExecutionContext,
    ) -> Result<WorkOutput>;
}

/// Maps the previous quality score to the next one for a loop iteration.
///
/// Implementations must be pure with respect to their inputs so that
/// replaying a score sequence yields identical convergence metrics.
pub trait ImprovementFunction: Send + Sync {
    fn improve(&self, mode: LoopMode, previous_quality: f64, target_quality: f64) -> f64;
}

/// Deterministic persona worker: satisfies the requested criteria and
/// reports a quality derived from the persona name and context size.
#[derive(Debug, Default)]
pub struct DeterministicWorker;

#[async_trait]
impl PersonaWorker for DeterministicWorker {
    async fn execute(
        &self,
        persona: &str,
        operation: &str,
        criteria: &[String],
        context: &ExecutionContext,
    ) -> Result<WorkOutput> {
        let key = format!("{}_{}", persona, operation.replace(' ', "_"));
        let mut output = HashMap::new();
        output.insert(
            key,
            json!({
                "persona": persona,
                "operation": operation,
                "context_entries": context.metadata.len(),
            }),
        );

        Ok(WorkOutput {
            output,
            quality: 0.85,
            findings: Vec::new(),
            recommendations: vec![format!("{}: reviewed {}", persona, operation)],
            criteria_met: criteria.to_vec(),
        })
    }
}

/// Deterministic sub-task simulator: one finding per scope item, severity
/// taken from the sub-task priority.
#[derive(Debug, Default)]
pub struct DeterministicSimulator;

#[async_trait]
impl WorkSimulator for DeterministicSimulator {
    async fn run_sub_task(
        &self,
        agent: &SubAgent,
        task: &SubTask,
        _context: &ExecutionContext,
    ) -> Result<WorkOutput> {
        let severity = match task.priority {
            cadence_core::Priority::Critical => Severity::Critical,
            cadence_core::Priority::High => Severity::High,
            cadence_core::Priority::Medium => Severity::Medium,
            cadence_core::Priority::Low => Severity::Low,
        };

        let findings = task
            .scope
            .iter()
            .map(|item| Finding {
                finding_type: agent.specialization.to_string(),
                file: Some(item.path.clone()),
                line: Some(1),
                severity,
                description: format!("{} review of {}", agent.persona, item.path),
            })
            .collect();

        let mut output = HashMap::new();
        output.insert(
            format!("sub_task_{}", task.sub_task_id),
            json!({ "items": task.scope.len() }),
        );

        Ok(WorkOutput {
            output,
            quality: 0.8,
            findings,
            recommendations: vec![format!(
                "{}: address {} findings in {}",
                agent.persona,
                task.scope.len(),
                task.description
            )],
            criteria_met: Vec::new(),
        })
    }
}

/// Deterministic improvement curve.
///
/// `converge` closes a fixed fraction of the gap to the target each
/// iteration and never overshoots it; the other modes grow toward 1.0 at
/// mode-specific rates.
#[derive(Debug, Default)]
pub struct GrowthImprovement;

impl ImprovementFunction for GrowthImprovement {
    fn improve(&self, mode: LoopMode, previous_quality: f64, target_quality: f64) -> f64 {
        let previous = previous_quality.clamp(0.0, 1.0);
        let next = match mode {
            LoopMode::Polish => previous + 0.03 * (1.0 - previous),
            LoopMode::Refine => previous + 0.06 * (1.0 - previous),
            LoopMode::Enhance => previous + 0.10 * (1.0 - previous),
            LoopMode::Converge => {
                let target = target_quality.clamp(0.0, 1.0);
                (previous + 0.25 * (target - previous)).min(target)
            }
        };
        next.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{Priority, ScopeItem};
    use crate::templates::Specialization;

    fn agent() -> SubAgent {
        SubAgent {
            agent_id: "agent-0".to_string(),
            specialization: Specialization::Security,
            persona: "security".to_string(),
            tools: vec![],
            focus: vec![],
            scope: vec![],
            status: cadence_core::AgentStatus::Idle,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_deterministic_worker_satisfies_criteria() {
        let worker = DeterministicWorker;
        let ctx = ExecutionContext::new("exec-1", "improve");
        let criteria = vec!["tests-pass".to_string(), "no-regressions".to_string()];

        let out = worker
            .execute("analyzer", "analyze", &criteria, &ctx)
            .await
            .unwrap();
        assert_eq!(out.criteria_met, criteria);
        assert!(out.quality > 0.0 && out.quality <= 1.0);
    }

    #[tokio::test]
    async fn test_simulator_emits_one_finding_per_item() {
        let simulator = DeterministicSimulator;
        let task = SubTask {
            sub_task_id: "st-0".to_string(),
            description: "scan auth".to_string(),
            scope: vec![
                ScopeItem::new("src/auth.rs", 900),
                ScopeItem::new("src/token.rs", 400),
            ],
            priority: Priority::Critical,
            specialization: Specialization::Security,
        };
        let ctx = ExecutionContext::new("exec-1", "scan");

        let out = simulator.run_sub_task(&agent(), &task, &ctx).await.unwrap();
        assert_eq!(out.findings.len(), 2);
        assert_eq!(out.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_converge_never_overshoots_target() {
        let f = GrowthImprovement;
        let mut quality = 0.5;
        for _ in 0..50 {
            quality = f.improve(LoopMode::Converge, quality, 0.9);
            assert!(quality <= 0.9);
        }
        assert!(quality > 0.85);
    }

    #[test]
    fn test_growth_is_monotonic() {
        let f = GrowthImprovement;
        for mode in [LoopMode::Polish, LoopMode::Refine, LoopMode::Enhance] {
            let next = f.improve(mode, 0.5, 1.0);
            assert!(next > 0.5);
            assert!(next <= 1.0);
        }
    }
}
