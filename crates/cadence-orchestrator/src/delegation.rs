//! Delegation engine
//!
//! Decomposes a task into sub-tasks, instantiates one specialized
//! sub-agent per sub-task, drives them through the concurrency
//! controller's admission window, and aggregates findings into a single
//! deduplicated, severity-sorted result.

use crate::concurrency::{ConcurrencyController, TaskOutcome};
use crate::decompose::{decompose, DecompositionStrategy};
use crate::resource::{ResourceManager, ResourceRequirements};
use cadence_agent::{Specialization, SubAgent, SubAgentManager, SubTask, WorkSimulator};
use cadence_core::{
    AgentStatus, CadenceError, ContextPreserver, DelegationDefaults, DelegationStatus,
    ExecutionContext, ExecutionKind, Finding, IdGenerator, Result,
};
use cadence_metrics::PerformanceTracker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The unit of work a caller delegates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationTask {
    pub operation: String,
    pub scope: Vec<cadence_core::ScopeItem>,
}

impl DelegationTask {
    pub fn new(operation: impl Into<String>, scope: Vec<cadence_core::ScopeItem>) -> Self {
        Self {
            operation: operation.into(),
            scope,
        }
    }
}

/// Caller knobs for one delegation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub decomposition: DecompositionStrategy,
    /// Overrides keyword inference when set
    pub specialization: Option<Specialization>,
    /// Overrides the configured admission window when set
    pub concurrency_limit: Option<usize>,
}

/// Decomposed plan, built before any sub-agent runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationPlan {
    pub sub_tasks: Vec<SubTask>,
    pub decomposition: DecompositionStrategy,
    pub concurrency_limit: usize,
}

/// Terminal status of one sub-agent's work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentResultStatus {
    Completed,
    Failed,
    Timeout,
}

/// One sub-agent's wrapped outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub sub_task_id: String,
    pub agent_id: String,
    pub status: SubAgentResultStatus,
    pub quality: f64,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub error: Option<String>,
}

/// Aggregated outcome of a delegation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationReport {
    pub delegation_id: String,
    pub status: DelegationStatus,
    pub plan: DelegationPlan,
    /// In completion order, not submission order
    pub sub_agent_results: Vec<SubAgentResult>,
    /// Deduplicated by (type, file, line), critical first
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub success_rate: f64,
    /// (success rate + min(1, 60000/execution ms)) / 2
    pub efficiency: f64,
    /// Whether efficiency cleared the configured bar
    pub worthwhile: bool,
    pub duration_ms: u64,
}

struct DelegationExecution {
    status: DelegationStatus,
    report: Option<DelegationReport>,
}

/// Decompose, fan out, aggregate
pub struct DelegationEngine {
    executions: RwLock<HashMap<String, DelegationExecution>>,
    defaults: DelegationDefaults,
    agents: Arc<SubAgentManager>,
    simulator: Arc<dyn WorkSimulator>,
    resources: Arc<ResourceManager>,
    tracker: Arc<PerformanceTracker>,
    preserver: Arc<dyn ContextPreserver>,
    ids: Arc<dyn IdGenerator>,
}

impl DelegationEngine {
    pub fn new(
        defaults: DelegationDefaults,
        agents: Arc<SubAgentManager>,
        simulator: Arc<dyn WorkSimulator>,
        resources: Arc<ResourceManager>,
        tracker: Arc<PerformanceTracker>,
        preserver: Arc<dyn ContextPreserver>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            defaults,
            agents,
            simulator,
            resources,
            tracker,
            preserver,
            ids,
        }
    }

    /// Build the plan without executing anything
    pub fn build_plan(
        &self,
        task: &DelegationTask,
        strategy: &StrategyConfig,
    ) -> Result<DelegationPlan> {
        let sub_tasks = decompose(
            &task.operation,
            &task.scope,
            strategy.decomposition,
            strategy.specialization,
            &self.defaults,
            self.ids.as_ref(),
        )?;
        Ok(DelegationPlan {
            sub_tasks,
            decomposition: strategy.decomposition,
            concurrency_limit: strategy
                .concurrency_limit
                .unwrap_or(self.defaults.concurrency_limit),
        })
    }

    /// Decompose the task and run every sub-task under the admission
    /// window. Individual sub-agent failures never abort siblings; the
    /// delegation only fails when every sub-task does.
    pub async fn delegate_to_sub_agents(
        &self,
        task: DelegationTask,
        strategy: StrategyConfig,
        context: ExecutionContext,
    ) -> Result<DelegationReport> {
        let running = self.active_count().await;
        if running >= self.defaults.max_concurrent_executions {
            return Err(CadenceError::Validation(format!(
                "Delegation capacity exhausted: {} executions already running",
                running
            )));
        }

        let plan = self.build_plan(&task, &strategy)?;
        let delegation_id = self.ids.next("dlg");
        self.executions.write().await.insert(
            delegation_id.clone(),
            DelegationExecution {
                status: DelegationStatus::Running,
                report: None,
            },
        );

        let allocation = self
            .resources
            .allocate(
                ExecutionKind::Delegation,
                ResourceRequirements {
                    memory_mb: 128 * plan.sub_tasks.len() as u64,
                    cpu_units: 10 * plan.sub_tasks.len() as u64,
                    concurrency: plan.concurrency_limit as u32,
                    timeout_ms: None,
                },
            )
            .await?;

        info!(
            "Delegation {} started: {} sub-tasks ({} decomposition), window {}",
            delegation_id,
            plan.sub_tasks.len(),
            plan.decomposition,
            plan.concurrency_limit
        );
        let started = Utc::now();
        let outcome = self.run_plan(&delegation_id, &plan, &context).await;
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        if let Err(e) = self.resources.release(&allocation.allocation_id).await {
            warn!("Delegation {} release failed: {}", delegation_id, e);
        }

        let results = outcome?;
        let report = self
            .aggregate(&delegation_id, plan, results, duration_ms)
            .await;
        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(&delegation_id) {
                execution.status = report.status;
                execution.report = Some(report.clone());
            }
        }

        // Preservation failures never fail the delegation
        let mut metadata = HashMap::new();
        metadata.insert(
            "sub_tasks".to_string(),
            json!(report.sub_agent_results.len()),
        );
        metadata.insert("success_rate".to_string(), json!(report.success_rate));
        if let Err(e) = self
            .preserver
            .preserve_context(&delegation_id, &context, metadata)
            .await
        {
            warn!("Delegation {} context preservation failed: {}", delegation_id, e);
        }
        Ok(report)
    }

    async fn run_plan(
        &self,
        delegation_id: &str,
        plan: &DelegationPlan,
        context: &ExecutionContext,
    ) -> Result<Vec<SubAgentResult>> {
        let mut agents = Vec::with_capacity(plan.sub_tasks.len());
        for sub_task in &plan.sub_tasks {
            let agent = self.agents.create_agent(sub_task).await?;
            self.agents
                .set_status(&agent.agent_id, AgentStatus::Running)
                .await?;
            agents.push(agent);
        }

        let controller = ConcurrencyController::new(plan.concurrency_limit)?;
        let timeout = Duration::from_millis(self.defaults.sub_task_timeout_ms);
        let futures: Vec<_> = plan
            .sub_tasks
            .iter()
            .cloned()
            .zip(agents.iter().cloned())
            .map(|(sub_task, agent)| {
                let simulator = Arc::clone(&self.simulator);
                let context = context.clone();
                async move {
                    let result = run_sub_task(simulator, agent, sub_task, context, timeout).await;
                    Ok::<_, CadenceError>(result)
                }
            })
            .collect();

        let outcomes = controller.run(futures, CancellationToken::new()).await;
        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(result) => results.push(result),
                // Panic or cancellation inside the window; no sub-task
                // identity survives, record a generic failure
                TaskOutcome::Failed(e) => results.push(SubAgentResult {
                    sub_task_id: String::new(),
                    agent_id: String::new(),
                    status: SubAgentResultStatus::Failed,
                    quality: 0.0,
                    findings: Vec::new(),
                    recommendations: Vec::new(),
                    error: Some(e),
                }),
                TaskOutcome::TimedOut => results.push(SubAgentResult {
                    sub_task_id: String::new(),
                    agent_id: String::new(),
                    status: SubAgentResultStatus::Timeout,
                    quality: 0.0,
                    findings: Vec::new(),
                    recommendations: Vec::new(),
                    error: Some("sub-task timeout".to_string()),
                }),
                TaskOutcome::Cancelled => {}
            }
        }

        // Results arrive in completion order; statuses key off agent ID
        for result in results.iter().filter(|r| !r.agent_id.is_empty()) {
            let terminal = match result.status {
                SubAgentResultStatus::Completed => AgentStatus::Completed,
                _ => AgentStatus::Failed,
            };
            if let Err(e) = self.agents.set_status(&result.agent_id, terminal).await {
                warn!("Delegation {}: {}", delegation_id, e);
            }
        }
        // Agents go back to idle once their results are recorded
        for agent in &agents {
            if let Err(e) = self.agents.release(&agent.agent_id).await {
                warn!("Delegation {}: {}", delegation_id, e);
            }
        }
        Ok(results)
    }

    async fn aggregate(
        &self,
        delegation_id: &str,
        plan: DelegationPlan,
        results: Vec<SubAgentResult>,
        duration_ms: u64,
    ) -> DelegationReport {
        let total = results.len().max(1);
        let succeeded = results
            .iter()
            .filter(|r| r.status == SubAgentResultStatus::Completed)
            .count();
        let success_rate = succeeded as f64 / total as f64;

        let mut seen = HashSet::new();
        let mut findings: Vec<Finding> = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();
        for result in &results {
            for finding in &result.findings {
                if seen.insert(finding.dedup_key()) {
                    findings.push(finding.clone());
                }
            }
            for rec in &result.recommendations {
                if !recommendations.contains(rec) {
                    recommendations.push(rec.clone());
                }
            }
        }
        findings.sort_by_key(|f| f.severity);

        let time_factor = (60_000.0 / duration_ms.max(1) as f64).min(1.0);
        let efficiency = (success_rate + time_factor) / 2.0;
        let worthwhile = efficiency >= self.defaults.efficiency_bar;
        let status = if succeeded == 0 {
            DelegationStatus::Failed
        } else {
            DelegationStatus::Completed
        };

        self.tracker
            .record_delegation_performance(delegation_id, results.len(), duration_ms, efficiency)
            .await;
        info!(
            "Delegation {} {}: {}/{} sub-tasks, efficiency {:.2}",
            delegation_id,
            if status == DelegationStatus::Completed {
                "completed"
            } else {
                "failed"
            },
            succeeded,
            results.len(),
            efficiency
        );

        DelegationReport {
            delegation_id: delegation_id.to_string(),
            status,
            plan,
            sub_agent_results: results,
            findings,
            recommendations,
            success_rate,
            efficiency,
            worthwhile,
            duration_ms,
        }
    }

    pub async fn get_delegation_status(&self, delegation_id: &str) -> Result<DelegationStatus> {
        self.executions
            .read()
            .await
            .get(delegation_id)
            .map(|e| e.status)
            .ok_or_else(|| CadenceError::NotFound(format!("delegation {}", delegation_id)))
    }

    /// Results are retained until queried here
    pub async fn get_delegation_results(
        &self,
        delegation_id: &str,
    ) -> Result<DelegationReport> {
        self.executions
            .read()
            .await
            .get(delegation_id)
            .and_then(|e| e.report.clone())
            .ok_or_else(|| CadenceError::NotFound(format!("delegation {}", delegation_id)))
    }

    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.status == DelegationStatus::Running)
            .count()
    }
}

async fn run_sub_task(
    simulator: Arc<dyn WorkSimulator>,
    agent: SubAgent,
    sub_task: SubTask,
    context: ExecutionContext,
    timeout: Duration,
) -> SubAgentResult {
    let work = simulator.run_sub_task(&agent, &sub_task, &context);
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(output)) => SubAgentResult {
            sub_task_id: sub_task.sub_task_id,
            agent_id: agent.agent_id,
            status: SubAgentResultStatus::Completed,
            quality: output.quality,
            findings: output.findings,
            recommendations: output.recommendations,
            error: None,
        },
        Ok(Err(e)) => SubAgentResult {
            sub_task_id: sub_task.sub_task_id,
            agent_id: agent.agent_id,
            status: SubAgentResultStatus::Failed,
            quality: 0.0,
            findings: Vec::new(),
            recommendations: Vec::new(),
            error: Some(e.to_string()),
        },
        Err(_) => SubAgentResult {
            sub_task_id: sub_task.sub_task_id,
            agent_id: agent.agent_id,
            status: SubAgentResultStatus::Timeout,
            quality: 0.0,
            findings: Vec::new(),
            recommendations: Vec::new(),
            error: Some("sub-task timeout".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_agent::{
        DeterministicSimulator, SubAgentManager, TemplateRegistry, WorkOutput,
    };
    use cadence_core::{InMemoryPreserver, ResourceDefaults, ScopeItem, SequentialIds, Severity};

    fn engine_preserving(
        simulator: Arc<dyn WorkSimulator>,
        preserver: Arc<dyn ContextPreserver>,
    ) -> DelegationEngine {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::new());
        DelegationEngine::new(
            DelegationDefaults::default(),
            Arc::new(SubAgentManager::new(
                TemplateRegistry::with_builtins(),
                Arc::clone(&ids),
            )),
            simulator,
            Arc::new(ResourceManager::new(
                ResourceDefaults::default(),
                Arc::clone(&ids),
            )),
            Arc::new(PerformanceTracker::new()),
            preserver,
            ids,
        )
    }

    fn engine_with(simulator: Arc<dyn WorkSimulator>) -> DelegationEngine {
        engine_preserving(simulator, Arc::new(InMemoryPreserver::new()))
    }

    fn engine() -> DelegationEngine {
        engine_with(Arc::new(DeterministicSimulator))
    }

    fn scope(n: usize) -> Vec<ScopeItem> {
        (0..n)
            .map(|i| ScopeItem::new(format!("src/mod{}/file{}.rs", i % 3, i), 2000))
            .collect()
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("exec-1", "improve")
    }

    #[tokio::test]
    async fn test_delegation_completes_and_aggregates() {
        let engine = engine();
        let report = engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve quality", scope(6)),
                StrategyConfig {
                    decomposition: DecompositionStrategy::Files,
                    ..Default::default()
                },
                context(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, DelegationStatus::Completed);
        assert_eq!(report.sub_agent_results.len(), 6);
        assert_eq!(report.success_rate, 1.0);
        assert!(report.worthwhile);
        // One finding per scope item, all distinct locations
        assert_eq!(report.findings.len(), 6);
    }

    #[tokio::test]
    async fn test_findings_deduplicated_and_sorted_by_severity() {
        /// Emits overlapping findings of mixed severity
        struct OverlappingSimulator;

        #[async_trait]
        impl WorkSimulator for OverlappingSimulator {
            async fn run_sub_task(
                &self,
                _agent: &SubAgent,
                task: &SubTask,
                _context: &ExecutionContext,
            ) -> Result<WorkOutput> {
                Ok(WorkOutput {
                    findings: vec![
                        Finding {
                            finding_type: "smell".to_string(),
                            file: Some("src/shared.rs".to_string()),
                            line: Some(10),
                            severity: Severity::Low,
                            description: "duplicated helper".to_string(),
                        },
                        Finding {
                            finding_type: "vulnerability".to_string(),
                            file: Some(task.scope[0].path.clone()),
                            line: Some(1),
                            severity: Severity::Critical,
                            description: "unchecked input".to_string(),
                        },
                    ],
                    quality: 0.9,
                    ..Default::default()
                })
            }
        }

        let engine = engine_with(Arc::new(OverlappingSimulator));
        let report = engine
            .delegate_to_sub_agents(
                DelegationTask::new("audit", scope(4)),
                StrategyConfig {
                    decomposition: DecompositionStrategy::Files,
                    ..Default::default()
                },
                context(),
            )
            .await
            .unwrap();

        // The shared finding collapses to one entry; 4 distinct criticals remain
        assert_eq!(report.findings.len(), 5);
        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert_eq!(report.findings.last().unwrap().severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_partial_failure_never_aborts_siblings() {
        struct HalfFailingSimulator;

        #[async_trait]
        impl WorkSimulator for HalfFailingSimulator {
            async fn run_sub_task(
                &self,
                agent: &SubAgent,
                task: &SubTask,
                context: &ExecutionContext,
            ) -> Result<WorkOutput> {
                if task.scope[0].path.contains("file0")
                    || task.scope[0].path.contains("file1")
                {
                    return Err(CadenceError::Agent("worker crashed".to_string()));
                }
                DeterministicSimulator.run_sub_task(agent, task, context).await
            }
        }

        let engine = engine_with(Arc::new(HalfFailingSimulator));
        let report = engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", scope(4)),
                StrategyConfig {
                    decomposition: DecompositionStrategy::Files,
                    ..Default::default()
                },
                context(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, DelegationStatus::Completed);
        assert_eq!(report.sub_agent_results.len(), 4);
        assert_eq!(report.success_rate, 0.5);
        assert_eq!(
            report
                .sub_agent_results
                .iter()
                .filter(|r| r.status == SubAgentResultStatus::Failed)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_total_failure_marks_delegation_failed() {
        struct AlwaysFailingSimulator;

        #[async_trait]
        impl WorkSimulator for AlwaysFailingSimulator {
            async fn run_sub_task(
                &self,
                _agent: &SubAgent,
                _task: &SubTask,
                _context: &ExecutionContext,
            ) -> Result<WorkOutput> {
                Err(CadenceError::Agent("all workers down".to_string()))
            }
        }

        let engine = engine_with(Arc::new(AlwaysFailingSimulator));
        let report = engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", scope(3)),
                StrategyConfig::default(),
                context(),
            )
            .await
            .unwrap();
        assert_eq!(report.status, DelegationStatus::Failed);
        assert_eq!(report.success_rate, 0.0);

        let status = engine
            .get_delegation_status(&report.delegation_id)
            .await
            .unwrap();
        assert_eq!(status, DelegationStatus::Failed);
    }

    #[tokio::test]
    async fn test_results_retained_for_query() {
        let engine = engine();
        let report = engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", scope(3)),
                StrategyConfig::default(),
                context(),
            )
            .await
            .unwrap();

        let stored = engine
            .get_delegation_results(&report.delegation_id)
            .await
            .unwrap();
        assert_eq!(stored.sub_agent_results.len(), report.sub_agent_results.len());
        assert!(engine.get_delegation_results("dlg-missing").await.is_err());
    }

    #[tokio::test]
    async fn test_agents_released_after_delegation() {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::new());
        let agents = Arc::new(SubAgentManager::new(
            TemplateRegistry::with_builtins(),
            Arc::clone(&ids),
        ));
        let engine = DelegationEngine::new(
            DelegationDefaults::default(),
            Arc::clone(&agents),
            Arc::new(DeterministicSimulator),
            Arc::new(ResourceManager::new(
                ResourceDefaults::default(),
                Arc::clone(&ids),
            )),
            Arc::new(PerformanceTracker::new()),
            Arc::new(InMemoryPreserver::new()),
            ids,
        );

        engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", scope(4)),
                StrategyConfig {
                    decomposition: DecompositionStrategy::Files,
                    ..Default::default()
                },
                context(),
            )
            .await
            .unwrap();

        assert_eq!(agents.total_count().await, 4);
        assert_eq!(agents.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_context_preserved_after_aggregation() {
        let preserver = Arc::new(InMemoryPreserver::new());
        let engine = engine_preserving(
            Arc::new(DeterministicSimulator),
            Arc::clone(&preserver) as Arc<dyn ContextPreserver>,
        );

        engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", scope(3)),
                StrategyConfig::default(),
                context(),
            )
            .await
            .unwrap();

        assert_eq!(preserver.snapshot_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_scope_rejected_before_any_state() {
        let engine = engine();
        let err = engine
            .delegate_to_sub_agents(
                DelegationTask::new("improve", vec![]),
                StrategyConfig::default(),
                context(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
        assert_eq!(engine.active_count().await, 0);
    }
}
