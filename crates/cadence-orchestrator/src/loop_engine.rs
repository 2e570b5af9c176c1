//! Loop mode controller
//!
//! Drives iterative refinement: each iteration maps the previous quality
//! score to a new one through the pluggable improvement function, runs the
//! registered quality gates, updates convergence metrics, and decides
//! whether another iteration is worth scheduling.

use crate::convergence::{
    default_gates, evaluate_continuation, ConvergenceMetrics, GateResult, QualityGate,
    TerminationReason,
};
use crate::resource::{ResourceManager, ResourceRequirements};
use cadence_agent::ImprovementFunction;
use cadence_core::{
    CadenceError, ContextPreserver, ExecutionContext, ExecutionKind, IdGenerator, LoopDefaults,
    LoopMode, Result, RunStatus,
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

/// Caller configuration for one loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub mode: LoopMode,
    pub operation: String,
    /// Starting quality estimate in [0,1]
    #[serde(default = "default_initial_quality")]
    pub initial_quality: f64,
    /// Target for `converge` mode; advisory for the others
    #[serde(default = "default_target_quality")]
    pub target_quality: f64,
    /// Overrides the configured default cap when set
    pub max_iterations: Option<u32>,
    /// Overrides the default quality gates when set
    #[serde(skip)]
    pub gates: Option<Vec<QualityGate>>,
}

fn default_initial_quality() -> f64 {
    0.5
}

fn default_target_quality() -> f64 {
    0.9
}

impl LoopConfig {
    pub fn new(mode: LoopMode, operation: impl Into<String>) -> Self {
        Self {
            mode,
            operation: operation.into(),
            initial_quality: 0.5,
            target_quality: 0.9,
            max_iterations: None,
            gates: None,
        }
    }

    pub fn with_initial_quality(mut self, quality: f64) -> Self {
        self.initial_quality = quality;
        self
    }

    pub fn with_target_quality(mut self, quality: f64) -> Self {
        self.target_quality = quality;
        self
    }

    pub fn with_max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    pub fn with_gates(mut self, gates: Vec<QualityGate>) -> Self {
        self.gates = Some(gates);
        self
    }
}

/// One executed iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopIteration {
    pub iteration_id: String,
    pub iteration_number: u32,
    pub input_quality: f64,
    pub output_quality: f64,
    /// max(0, output − input)
    pub improvement_score: f64,
    pub gate_results: Vec<GateResult>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

struct LoopExecution {
    loop_id: String,
    config: LoopConfig,
    status: RunStatus,
    iterations: Vec<LoopIteration>,
    metrics: ConvergenceMetrics,
    gates: Vec<QualityGate>,
    context: ExecutionContext,
    cancel: CancellationToken,
    termination: Option<TerminationReason>,
    allocation_id: String,
    start_time: DateTime<Utc>,
}

/// Point-in-time view of a loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStatusReport {
    pub loop_id: String,
    pub status: RunStatus,
    pub mode: LoopMode,
    pub iterations: u32,
    pub latest_quality: f64,
    pub convergence_confidence: f64,
    pub termination: Option<TerminationReason>,
}

/// Final outcome of a loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    pub loop_id: String,
    pub status: RunStatus,
    pub mode: LoopMode,
    pub iterations: Vec<LoopIteration>,
    pub final_quality: f64,
    /// Final quality minus the starting quality
    pub total_improvement: f64,
    pub termination: Option<TerminationReason>,
    /// Per-iteration quality scores, for charting
    pub quality_progression: Vec<f64>,
    /// Per-iteration improvement scores, for charting
    pub improvement_progression: Vec<f64>,
    pub duration_ms: u64,
}

/// Manages loop executions and their convergence thresholds
pub struct LoopController {
    executions: RwLock<HashMap<String, LoopExecution>>,
    defaults: RwLock<LoopDefaults>,
    improver: Arc<dyn ImprovementFunction>,
    resources: Arc<ResourceManager>,
    tracker: Arc<PerformanceTracker>,
    preserver: Arc<dyn ContextPreserver>,
    ids: Arc<dyn IdGenerator>,
}

impl LoopController {
    pub fn new(
        defaults: LoopDefaults,
        improver: Arc<dyn ImprovementFunction>,
        resources: Arc<ResourceManager>,
        tracker: Arc<PerformanceTracker>,
        preserver: Arc<dyn ContextPreserver>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            defaults: RwLock::new(defaults),
            improver,
            resources,
            tracker,
            preserver,
            ids,
        }
    }

    /// Adjust convergence thresholds for current and future loops
    pub async fn configure_convergence(&self, defaults: LoopDefaults) {
        info!(
            "Convergence reconfigured: improvement {}, window {}, plateau {}, confidence {}",
            defaults.quality_improvement_threshold,
            defaults.stability_window,
            defaults.quality_plateau_threshold,
            defaults.convergence_confidence_threshold
        );
        *self.defaults.write().await = defaults;
    }

    /// Register a loop and snapshot its initial context
    pub async fn start_loop(
        &self,
        config: LoopConfig,
        context: ExecutionContext,
    ) -> Result<String> {
        if !(0.0..=1.0).contains(&config.initial_quality) {
            return Err(CadenceError::Validation(format!(
                "Initial quality {} outside [0,1]",
                config.initial_quality
            )));
        }
        let defaults = self.defaults.read().await.clone();
        let running = self.active_count().await;
        if running >= defaults.max_concurrent_executions {
            return Err(CadenceError::Validation(format!(
                "Loop capacity exhausted: {} executions already running",
                running
            )));
        }

        let allocation = self
            .resources
            .allocate(
                ExecutionKind::Loop,
                ResourceRequirements {
                    memory_mb: 256,
                    cpu_units: 25,
                    concurrency: 1,
                    timeout_ms: None,
                },
            )
            .await?;

        let loop_id = self.ids.next("loop");
        let gates = config.gates.clone().unwrap_or_else(default_gates);
        let execution = LoopExecution {
            loop_id: loop_id.clone(),
            config,
            status: RunStatus::Running,
            iterations: Vec::new(),
            metrics: ConvergenceMetrics::default(),
            gates,
            context,
            cancel: CancellationToken::new(),
            termination: None,
            allocation_id: allocation.allocation_id,
            start_time: Utc::now(),
        };
        self.executions
            .write()
            .await
            .insert(loop_id.clone(), execution);

        info!("Loop {} started", loop_id);
        Ok(loop_id)
    }

    /// Execute the next iteration of a running loop.
    ///
    /// Fails with a validation error once the loop has terminated or a
    /// continuation decision has already stopped it.
    pub async fn execute_iteration(&self, loop_id: &str) -> Result<LoopIteration> {
        let started = Utc::now();
        let defaults = self.defaults.read().await.clone();

        let (config, previous_quality, iteration_number, gates, cancelled) = {
            let executions = self.executions.read().await;
            let execution = executions
                .get(loop_id)
                .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
            if execution.status != RunStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Loop {} is not running (status {})",
                    loop_id, execution.status
                )));
            }
            if execution.termination.is_some() {
                return Err(CadenceError::Validation(format!(
                    "Loop {} already stopped ({})",
                    loop_id,
                    execution.termination.map(|t| t.to_string()).unwrap_or_default()
                )));
            }
            (
                execution.config.clone(),
                execution
                    .iterations
                    .last()
                    .map(|it| it.output_quality)
                    .unwrap_or(execution.config.initial_quality),
                execution.iterations.len() as u32 + 1,
                execution.gates.clone(),
                execution.cancel.is_cancelled(),
            )
        };
        if cancelled {
            return Err(CadenceError::Validation(format!(
                "Loop {} cancelled",
                loop_id
            )));
        }

        let output_quality =
            self.improver
                .improve(config.mode, previous_quality, config.target_quality);
        let improvement_score = (output_quality - previous_quality).max(0.0);
        let gate_results: Vec<GateResult> = gates
            .iter()
            .map(|g| g.evaluate(output_quality, improvement_score))
            .collect();
        for gate in gate_results.iter().filter(|g| !g.passed) {
            debug!(
                "Loop {} iteration {}: gate {} failed ({:.3} < {:.3})",
                loop_id, iteration_number, gate.name, gate.value, gate.threshold
            );
        }

        let iteration = LoopIteration {
            iteration_id: self.ids.next("iter"),
            iteration_number,
            input_quality: previous_quality,
            output_quality,
            improvement_score,
            gate_results,
            execution_time_ms: (Utc::now() - started).num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        };

        let max_iterations = config.max_iterations.unwrap_or(defaults.max_iterations);
        {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(loop_id)
                .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
            execution
                .metrics
                .update(output_quality, improvement_score, defaults.stability_window);
            execution.iterations.push(iteration.clone());
            execution.termination = evaluate_continuation(
                &execution.metrics,
                iteration_number,
                max_iterations,
                &defaults,
            );
            if let Some(reason) = execution.termination {
                debug!("Loop {} stopping after iteration {}: {}", loop_id, iteration_number, reason);
            }
        }

        self.tracker
            .record_loop_iteration(loop_id, output_quality, improvement_score)
            .await;
        Ok(iteration)
    }

    /// Whether another iteration should be scheduled
    pub async fn should_continue(&self, loop_id: &str) -> Result<bool> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(loop_id)
            .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
        Ok(execution.status == RunStatus::Running
            && execution.termination.is_none()
            && !execution.cancel.is_cancelled())
    }

    /// Finalize a loop and produce its report
    pub async fn complete_loop(&self, loop_id: &str) -> Result<LoopReport> {
        let (report, snapshot) = {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(loop_id)
                .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
            if execution.status != RunStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Loop {} is not running (status {})",
                    loop_id, execution.status
                )));
            }
            execution.status = RunStatus::Completed;

            let final_quality = execution
                .iterations
                .last()
                .map(|it| it.output_quality)
                .unwrap_or(execution.config.initial_quality);
            let report = LoopReport {
                loop_id: loop_id.to_string(),
                status: RunStatus::Completed,
                mode: execution.config.mode,
                iterations: execution.iterations.clone(),
                final_quality,
                total_improvement: final_quality - execution.config.initial_quality,
                termination: execution.termination,
                quality_progression: execution.metrics.quality_progression.clone(),
                improvement_progression: execution.metrics.improvement_rates.clone(),
                duration_ms: (Utc::now() - execution.start_time).num_milliseconds().max(0)
                    as u64,
            };
            (report, execution.context.clone())
        };

        self.release(loop_id).await;

        // Preservation failures never fail completion
        let mut metadata = HashMap::new();
        metadata.insert("final_quality".to_string(), json!(report.final_quality));
        metadata.insert(
            "iterations".to_string(),
            json!(report.iterations.len()),
        );
        if let Err(e) = self
            .preserver
            .preserve_context(loop_id, &snapshot, metadata)
            .await
        {
            warn!("Loop {} context preservation failed: {}", loop_id, e);
        }

        self.tracker
            .record_loop_completion(loop_id, report.iterations.len() as u32, report.final_quality)
            .await;
        info!(
            "Loop {} completed: {} iterations, final quality {:.3}",
            loop_id,
            report.iterations.len(),
            report.final_quality
        );
        Ok(report)
    }

    /// Cancel a running loop; in-flight awaits observe the token
    pub async fn cancel_loop(&self, loop_id: &str) -> Result<()> {
        {
            let mut executions = self.executions.write().await;
            let execution = executions
                .get_mut(loop_id)
                .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
            if execution.status != RunStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Loop {} is not running (status {})",
                    loop_id, execution.status
                )));
            }
            execution.cancel.cancel();
            execution.status = RunStatus::Cancelled;
        }
        self.release(loop_id).await;
        info!("Loop {} cancelled", loop_id);
        Ok(())
    }

    /// Start a loop and drive it until a continuation decision stops it
    pub async fn run_loop(
        &self,
        config: LoopConfig,
        context: ExecutionContext,
    ) -> Result<LoopReport> {
        let loop_id = self.start_loop(config, context).await?;
        let cancel = {
            let executions = self.executions.read().await;
            executions
                .get(&loop_id)
                .map(|e| e.cancel.clone())
                .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?
        };

        while self.should_continue(&loop_id).await? {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                iteration = self.execute_iteration(&loop_id) => {
                    iteration?;
                }
            }
        }
        self.complete_loop(&loop_id).await
    }

    pub async fn get_loop_status(&self, loop_id: &str) -> Result<LoopStatusReport> {
        let executions = self.executions.read().await;
        let execution = executions
            .get(loop_id)
            .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))?;
        Ok(LoopStatusReport {
            loop_id: execution.loop_id.clone(),
            status: execution.status,
            mode: execution.config.mode,
            iterations: execution.iterations.len() as u32,
            latest_quality: execution
                .metrics
                .latest_quality()
                .unwrap_or(execution.config.initial_quality),
            convergence_confidence: execution.metrics.convergence_confidence,
            termination: execution.termination,
        })
    }

    /// Snapshot of the context a loop was started with
    pub async fn loop_context(&self, loop_id: &str) -> Result<ExecutionContext> {
        let executions = self.executions.read().await;
        executions
            .get(loop_id)
            .map(|e| e.context.clone())
            .ok_or_else(|| CadenceError::NotFound(format!("loop {}", loop_id)))
    }

    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.status == RunStatus::Running)
            .count()
    }

    async fn release(&self, loop_id: &str) {
        let allocation_id = {
            let executions = self.executions.read().await;
            executions.get(loop_id).map(|e| e.allocation_id.clone())
        };
        if let Some(allocation_id) = allocation_id {
            if let Err(e) = self.resources.release(&allocation_id).await {
                warn!("Loop {} release failed: {}", loop_id, e);
            }
        }
    }
}
