//! Chain mode manager
//!
//! Runs personas strictly in configured order. Each link executes against
//! the context handed to it, contributes to the accumulated context, and
//! hands off to the next persona per the configured strategy. Chain
//! quality blends mean link quality with mean handoff fidelity.

use crate::handoff::{
    perform_handoff, AccumulatedContext, ContextCategory, Contribution, HandoffRecord,
    HandoffStrategy,
};
use crate::recovery::{choose_chain_recovery, classify_failure, ChainRecovery};
use crate::resource::{ResourceManager, ResourceRequirements};
use cadence_agent::{PersonaWorker, WorkOutput};
use cadence_core::{
    CadenceError, ChainDefaults, ContextPreserver, ExecutionContext, ExecutionKind, IdGenerator,
    Result, RunStatus,
};
use cadence_metrics::PerformanceTracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller configuration for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub operation: String,
    /// Personas in execution order
    pub personas: Vec<String>,
    #[serde(default)]
    pub handoff_strategy: HandoffStrategy,
}

impl ChainConfig {
    pub fn new(operation: impl Into<String>, personas: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            personas,
            handoff_strategy: HandoffStrategy::default(),
        }
    }

    pub fn with_handoff_strategy(mut self, strategy: HandoffStrategy) -> Self {
        self.handoff_strategy = strategy;
        self
    }
}

/// Per-link lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// One persona's slot in a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainLink {
    pub link_id: String,
    pub persona: String,
    pub order: usize,
    pub status: LinkStatus,
    pub quality: f64,
    pub execution_time_ms: u64,
    pub handoff_time_ms: u64,
    pub recommendations: Vec<String>,
}

struct ChainExecution {
    chain_id: String,
    config: ChainConfig,
    links: Vec<ChainLink>,
    current_link_index: usize,
    status: RunStatus,
    accumulated: AccumulatedContext,
    /// Payload the next link executes against, produced by the last handoff
    incoming: AccumulatedContext,
    handoff_history: Vec<HandoffRecord>,
    context: ExecutionContext,
    cancel: CancellationToken,
    allocation_id: String,
    start_time: DateTime<Utc>,
}

/// Point-in-time view of a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatusReport {
    pub chain_id: String,
    pub status: RunStatus,
    pub current_link_index: usize,
    pub total_links: usize,
    pub handoffs: usize,
}

/// Final outcome of a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReport {
    pub chain_id: String,
    pub status: RunStatus,
    pub links: Vec<ChainLink>,
    pub handoff_history: Vec<HandoffRecord>,
    pub accumulated: AccumulatedContext,
    /// 0.7 × mean link quality + 0.3 × mean handoff fidelity
    pub quality: f64,
    pub duration_ms: u64,
}

/// Drives persona chains link by link
pub struct ChainManager {
    executions: RwLock<HashMap<String, ChainExecution>>,
    defaults: ChainDefaults,
    worker: Arc<dyn PersonaWorker>,
    resources: Arc<ResourceManager>,
    tracker: Arc<PerformanceTracker>,
    preserver: Arc<dyn ContextPreserver>,
    ids: Arc<dyn IdGenerator>,
}

impl ChainManager {
    pub fn new(
        defaults: ChainDefaults,
        worker: Arc<dyn PersonaWorker>,
        resources: Arc<ResourceManager>,
        tracker: Arc<PerformanceTracker>,
        preserver: Arc<dyn ContextPreserver>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            defaults,
            worker,
            resources,
            tracker,
            preserver,
            ids,
        }
    }

    /// Register a chain: one link per persona, in configuration order
    pub async fn start_chain(
        &self,
        config: ChainConfig,
        context: ExecutionContext,
    ) -> Result<String> {
        if config.personas.is_empty() {
            return Err(CadenceError::Validation(
                "Chain requires at least one persona".to_string(),
            ));
        }
        let running = self.active_count().await;
        if running >= self.defaults.max_concurrent_executions {
            return Err(CadenceError::Validation(format!(
                "Chain capacity exhausted: {} executions already running",
                running
            )));
        }

        let allocation = self
            .resources
            .allocate(
                ExecutionKind::Chain,
                ResourceRequirements {
                    memory_mb: 256,
                    cpu_units: 25,
                    concurrency: 1,
                    timeout_ms: None,
                },
            )
            .await?;

        let chain_id = self.ids.next("chain");
        let links = config
            .personas
            .iter()
            .enumerate()
            .map(|(order, persona)| ChainLink {
                link_id: self.ids.next("link"),
                persona: persona.clone(),
                order,
                status: LinkStatus::Pending,
                quality: 0.0,
                execution_time_ms: 0,
                handoff_time_ms: 0,
                recommendations: Vec::new(),
            })
            .collect();

        let execution = ChainExecution {
            chain_id: chain_id.clone(),
            config,
            links,
            current_link_index: 0,
            status: RunStatus::Running,
            accumulated: AccumulatedContext::default(),
            incoming: AccumulatedContext::default(),
            handoff_history: Vec::new(),
            context,
            cancel: CancellationToken::new(),
            allocation_id: allocation.allocation_id,
            start_time: Utc::now(),
        };
        self.executions
            .write()
            .await
            .insert(chain_id.clone(), execution);

        info!("Chain {} started", chain_id);
        Ok(chain_id)
    }

    /// Execute the current link, then hand off to the next persona.
    ///
    /// Fails with a validation error on a non-running chain. Link failures
    /// go through the recovery policy: retry once, skip, roll accumulated
    /// context back, or abort.
    pub async fn execute_next_link(&self, chain_id: &str) -> Result<ChainLink> {
        let (operation, persona, index, total, incoming, context, cancelled) = {
            let executions = self.executions.read().await;
            let execution = self.get(&executions, chain_id)?;
            if execution.status != RunStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Chain {} is not running (status {})",
                    chain_id, execution.status
                )));
            }
            let index = execution.current_link_index;
            if index >= execution.links.len() {
                return Err(CadenceError::Validation(format!(
                    "Chain {} has no pending links",
                    chain_id
                )));
            }
            (
                execution.config.operation.clone(),
                execution.links[index].persona.clone(),
                index,
                execution.links.len(),
                execution.incoming.clone(),
                execution.context.clone(),
                execution.cancel.is_cancelled(),
            )
        };
        if cancelled {
            return Err(CadenceError::Validation(format!(
                "Chain {} cancelled",
                chain_id
            )));
        }

        // The link sees the handed-off context, not the raw accumulation
        let link_context = context.with_metadata(
            "accumulated_context",
            serde_json::to_value(&incoming).unwrap_or_else(|_| json!({})),
        );

        let started = Utc::now();
        let mut outcome = self
            .worker
            .execute(&persona, &operation, &[], &link_context)
            .await;
        if let Err(e) = &outcome {
            let profile = classify_failure(e);
            match choose_chain_recovery(profile) {
                ChainRecovery::Retry => {
                    warn!("Chain {} link {} failed, retrying once: {}", chain_id, persona, e);
                    outcome = self
                        .worker
                        .execute(&persona, &operation, &[], &link_context)
                        .await;
                }
                ChainRecovery::Skip => {
                    warn!("Chain {} link {} failed, skipping: {}", chain_id, persona, e);
                    return self.skip_link(chain_id, index).await;
                }
                ChainRecovery::Rollback => {
                    // Accumulated context was last mutated by the previous
                    // link, so restoring it is dropping this link's payload
                    warn!("Chain {} link {} failed with critical impact: {}", chain_id, persona, e);
                    self.fail(chain_id).await;
                    return Err(CadenceError::Chain(format!(
                        "Link {} rolled back: {}",
                        persona, e
                    )));
                }
                ChainRecovery::Abort => {
                    self.fail(chain_id).await;
                    return Err(CadenceError::Chain(format!("Link {} aborted: {}", persona, e)));
                }
            }
        }

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                self.fail(chain_id).await;
                return Err(CadenceError::Chain(format!(
                    "Link {} failed after retry: {}",
                    persona, e
                )));
            }
        };
        let execution_time_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(chain_id)
            .ok_or_else(|| CadenceError::NotFound(format!("chain {}", chain_id)))?;

        merge_output(&mut execution.accumulated, &persona, &output);

        // Handoff to the next persona, if any
        let mut handoff_time_ms = 0;
        let mut handoff_to = None;
        if index + 1 < total {
            let handoff_started = Utc::now();
            let next_persona = execution.links[index + 1].persona.clone();
            let (payload, record) = perform_handoff(
                execution.config.handoff_strategy,
                &persona,
                &next_persona,
                &execution.accumulated,
            );
            handoff_time_ms = (Utc::now() - handoff_started).num_milliseconds().max(0) as u64;
            debug!(
                "Chain {} handoff {} -> {}: fidelity {:.2}",
                chain_id, persona, next_persona, record.fidelity
            );
            self.tracker
                .record_chain_handoff(chain_id, handoff_time_ms, record.fidelity)
                .await;
            execution.incoming = payload;
            execution.handoff_history.push(record);
            handoff_to = Some(next_persona);
        }

        let link = &mut execution.links[index];
        link.status = LinkStatus::Completed;
        link.quality = output.quality;
        link.execution_time_ms = execution_time_ms;
        link.handoff_time_ms = handoff_time_ms;
        link.recommendations = output.recommendations.clone();
        let completed = link.clone();

        execution.current_link_index += 1;

        // Snapshot the accumulated context at the handoff boundary;
        // preservation failures never fail the link
        let snapshot = handoff_to.as_ref().map(|_| {
            execution.context.clone().with_metadata(
                "accumulated_context",
                serde_json::to_value(&execution.accumulated).unwrap_or_else(|_| json!({})),
            )
        });
        drop(executions);

        if let (Some(snapshot), Some(next)) = (snapshot, handoff_to) {
            let mut metadata = HashMap::new();
            metadata.insert("handoff".to_string(), json!(format!("{} -> {}", persona, next)));
            if let Err(e) = self
                .preserver
                .preserve_context(chain_id, &snapshot, metadata)
                .await
            {
                warn!("Chain {} context preservation failed: {}", chain_id, e);
            }
        }
        Ok(completed)
    }

    async fn skip_link(&self, chain_id: &str, index: usize) -> Result<ChainLink> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(chain_id)
            .ok_or_else(|| CadenceError::NotFound(format!("chain {}", chain_id)))?;
        execution.links[index].status = LinkStatus::Skipped;
        execution.current_link_index += 1;
        Ok(execution.links[index].clone())
    }

    async fn fail(&self, chain_id: &str) {
        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(chain_id) {
                if let Some(link) = execution.links.get_mut(execution.current_link_index) {
                    link.status = LinkStatus::Failed;
                }
                execution.status = RunStatus::Failed;
            }
        }
        // Failed chains still release their pool share
        self.release(chain_id).await;
    }

    /// Drive links in order until the chain completes or a link fails
    pub async fn execute_chain(&self, chain_id: &str) -> Result<ChainReport> {
        loop {
            let (status, index, total, cancel) = {
                let executions = self.executions.read().await;
                let execution = self.get(&executions, chain_id)?;
                (
                    execution.status,
                    execution.current_link_index,
                    execution.links.len(),
                    execution.cancel.clone(),
                )
            };
            if status != RunStatus::Running || index >= total {
                break;
            }

            let link = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                link = self.execute_next_link(chain_id) => link,
            };
            link?;
        }
        self.complete_chain(chain_id).await
    }

    /// Start a chain and run it to completion
    pub async fn run_chain(
        &self,
        config: ChainConfig,
        context: ExecutionContext,
    ) -> Result<ChainReport> {
        let chain_id = self.start_chain(config, context).await?;
        self.execute_chain(&chain_id).await
    }

    async fn complete_chain(&self, chain_id: &str) -> Result<ChainReport> {
        let report = {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(chain_id)
                .ok_or_else(|| CadenceError::NotFound(format!("chain {}", chain_id)))?;
            if execution.status == RunStatus::Running {
                execution.status = if execution.cancel.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
            }

            let link_qualities: Vec<f64> = execution
                .links
                .iter()
                .filter(|l| l.status == LinkStatus::Completed)
                .map(|l| l.quality)
                .collect();
            let mean_quality = mean(&link_qualities);
            let fidelities: Vec<f64> = execution
                .handoff_history
                .iter()
                .map(|h| h.fidelity)
                .collect();
            let mean_fidelity = if fidelities.is_empty() {
                1.0
            } else {
                mean(&fidelities)
            };
            let quality = 0.7 * mean_quality + 0.3 * mean_fidelity;

            ChainReport {
                chain_id: chain_id.to_string(),
                status: execution.status,
                links: execution.links.clone(),
                handoff_history: execution.handoff_history.clone(),
                accumulated: execution.accumulated.clone(),
                quality,
                duration_ms: (Utc::now() - execution.start_time).num_milliseconds().max(0)
                    as u64,
            }
        };

        self.release(chain_id).await;
        self.tracker
            .record_chain_completion(chain_id, report.quality)
            .await;
        info!(
            "Chain {} finished ({}): quality {:.2}",
            chain_id, report.status, report.quality
        );
        Ok(report)
    }

    /// Cancel a running chain; no further links are scheduled
    pub async fn cancel_chain(&self, chain_id: &str) -> Result<()> {
        {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(chain_id)
                .ok_or_else(|| CadenceError::NotFound(format!("chain {}", chain_id)))?;
            if execution.status != RunStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Chain {} is not running (status {})",
                    chain_id, execution.status
                )));
            }
            execution.cancel.cancel();
            execution.status = RunStatus::Cancelled;
        }
        self.release(chain_id).await;
        info!("Chain {} cancelled", chain_id);
        Ok(())
    }

    pub async fn get_chain_status(&self, chain_id: &str) -> Result<ChainStatusReport> {
        let executions = self.executions.read().await;
        let execution = self.get(&executions, chain_id)?;
        Ok(ChainStatusReport {
            chain_id: execution.chain_id.clone(),
            status: execution.status,
            current_link_index: execution.current_link_index,
            total_links: execution.links.len(),
            handoffs: execution.handoff_history.len(),
        })
    }

    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.status == RunStatus::Running)
            .count()
    }

    async fn release(&self, chain_id: &str) {
        let allocation_id = {
            let executions = self.executions.read().await;
            executions.get(chain_id).map(|e| e.allocation_id.clone())
        };
        if let Some(allocation_id) = allocation_id {
            if let Err(e) = self.resources.release(&allocation_id).await {
                debug!("Chain {} release skipped: {}", chain_id, e);
            }
        }
    }

    fn get<'a>(
        &self,
        executions: &'a HashMap<String, ChainExecution>,
        chain_id: &str,
    ) -> Result<&'a ChainExecution> {
        executions
            .get(chain_id)
            .ok_or_else(|| CadenceError::NotFound(format!("chain {}", chain_id)))
    }
}

/// Fold one link's output into the accumulated context
fn merge_output(accumulated: &mut AccumulatedContext, persona: &str, output: &WorkOutput) {
    for finding in &output.findings {
        accumulated.add(
            ContextCategory::Insights,
            Contribution::new(persona, finding.description.clone()),
        );
    }
    for rec in &output.recommendations {
        accumulated.add(
            ContextCategory::Recommendations,
            Contribution::new(persona, rec.clone()),
        );
    }
    for criterion in &output.criteria_met {
        accumulated.add(
            ContextCategory::Decisions,
            Contribution::new(persona, criterion.clone()),
        );
    }
    for key in output.output.keys() {
        accumulated.add(ContextCategory::Artifacts, Contribution::new(persona, key.clone()));
    }
    accumulated.add(
        ContextCategory::Expertise,
        Contribution::new(persona, persona.to_string()),
    );
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_agent::DeterministicWorker;
    use cadence_core::{InMemoryPreserver, ResourceDefaults, SequentialIds};

    fn manager_preserving(
        worker: Arc<dyn PersonaWorker>,
        preserver: Arc<dyn ContextPreserver>,
    ) -> ChainManager {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::new());
        ChainManager::new(
            ChainDefaults::default(),
            worker,
            Arc::new(ResourceManager::new(
                ResourceDefaults::default(),
                Arc::clone(&ids),
            )),
            Arc::new(PerformanceTracker::new()),
            preserver,
            ids,
        )
    }

    fn manager_with(worker: Arc<dyn PersonaWorker>) -> ChainManager {
        manager_preserving(worker, Arc::new(InMemoryPreserver::new()))
    }

    fn manager() -> ChainManager {
        manager_with(Arc::new(DeterministicWorker))
    }

    fn personas() -> Vec<String> {
        vec!["analyzer".into(), "architect".into(), "qa".into()]
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("exec-1", "review")
    }

    #[tokio::test]
    async fn test_chain_runs_links_in_order() {
        let manager = manager();
        let report = manager
            .run_chain(ChainConfig::new("review", personas()), context())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.links.len(), 3);
        assert!(report
            .links
            .iter()
            .all(|l| l.status == LinkStatus::Completed));
        assert_eq!(report.handoff_history.len(), 2);
        assert!(report.quality > 0.0);
    }

    #[tokio::test]
    async fn test_cumulative_context_grows_across_handoffs() {
        let manager = manager();
        let report = manager
            .run_chain(
                ChainConfig::new("review", personas())
                    .with_handoff_strategy(HandoffStrategy::Cumulative),
                context(),
            )
            .await
            .unwrap();

        // Later handoffs carry a superset of earlier link output
        let first = &report.handoff_history[0];
        let second = &report.handoff_history[1];
        assert!(second.preserved_elements > first.preserved_elements);
        assert_eq!(first.fidelity, 1.0);
        assert_eq!(second.fidelity, 1.0);
    }

    #[tokio::test]
    async fn test_sequential_handoff_drops_older_contributions() {
        let manager = manager();
        let report = manager
            .run_chain(
                ChainConfig::new("review", personas())
                    .with_handoff_strategy(HandoffStrategy::Sequential),
                context(),
            )
            .await
            .unwrap();

        // The second handoff drops the first persona's contributions
        assert!(report.handoff_history[1].fidelity < 1.0);
        assert!(report.handoff_history[1].transformed_elements > 0);
    }

    #[tokio::test]
    async fn test_empty_persona_list_rejected() {
        let manager = manager();
        let err = manager
            .start_chain(ChainConfig::new("review", vec![]), context())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_execute_past_last_link_is_validation_error() {
        let manager = manager();
        let chain_id = manager
            .start_chain(ChainConfig::new("review", vec!["analyzer".into()]), context())
            .await
            .unwrap();
        manager.execute_next_link(&chain_id).await.unwrap();

        let err = manager.execute_next_link(&chain_id).await.unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_prevents_further_links() {
        let manager = manager();
        let chain_id = manager
            .start_chain(ChainConfig::new("review", personas()), context())
            .await
            .unwrap();
        manager.execute_next_link(&chain_id).await.unwrap();
        manager.cancel_chain(&chain_id).await.unwrap();

        assert!(manager.execute_next_link(&chain_id).await.is_err());
        let status = manager.get_chain_status(&chain_id).await.unwrap();
        assert_eq!(status.status, RunStatus::Cancelled);
        assert_eq!(status.current_link_index, 1);
    }

    /// Fails a persona a configurable number of times before succeeding
    struct FlakyWorker {
        fail_persona: String,
        failures: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PersonaWorker for FlakyWorker {
        async fn execute(
            &self,
            persona: &str,
            operation: &str,
            criteria: &[String],
            context: &ExecutionContext,
        ) -> Result<WorkOutput> {
            if persona == self.fail_persona {
                let remaining = self.failures.load(std::sync::atomic::Ordering::SeqCst);
                if remaining > 0 {
                    self.failures
                        .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    return Err(CadenceError::Agent(format!("{} flaked", persona)));
                }
            }
            DeterministicWorker
                .execute(persona, operation, criteria, context)
                .await
        }
    }

    #[tokio::test]
    async fn test_transient_link_failure_is_retried() {
        let manager = manager_with(Arc::new(FlakyWorker {
            fail_persona: "architect".to_string(),
            failures: std::sync::atomic::AtomicUsize::new(1),
        }));

        let report = manager
            .run_chain(ChainConfig::new("review", personas()), context())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert!(report
            .links
            .iter()
            .all(|l| l.status == LinkStatus::Completed));
    }

    #[tokio::test]
    async fn test_context_preserved_at_each_handoff() {
        let preserver = Arc::new(InMemoryPreserver::new());
        let manager = manager_preserving(
            Arc::new(DeterministicWorker),
            Arc::clone(&preserver) as Arc<dyn ContextPreserver>,
        );

        let report = manager
            .run_chain(ChainConfig::new("review", personas()), context())
            .await
            .unwrap();
        assert_eq!(report.handoff_history.len(), 2);

        // One snapshot per handoff; the final link has no successor
        assert_eq!(preserver.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn test_persistent_link_failure_fails_chain() {
        let manager = manager_with(Arc::new(FlakyWorker {
            fail_persona: "architect".to_string(),
            failures: std::sync::atomic::AtomicUsize::new(10),
        }));

        let err = manager
            .run_chain(ChainConfig::new("review", personas()), context())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Chain(_)));
    }
}
