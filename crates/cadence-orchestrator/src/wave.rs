//! Wave orchestration engine
//!
//! Executes planned phases in order, fanning out parallel phases across
//! participants, checkpointing after each successful phase, and rolling
//! back to the last good checkpoint when a phase fails and rollback is
//! enabled.

use crate::checkpoint::{CheckpointManager, RollbackScope};
use crate::phases::{self, OperationProfile, WavePhase, WavePlan, WaveStrategy};
use crate::recovery::{choose_wave_recovery, classify_phase_failure, WaveRecovery};
use crate::resource::ResourceManager;
use cadence_agent::{PersonaWorker, WorkOutput};
use cadence_core::{
    CadenceError, ContextPreserver, ExecutionContext, ExecutionKind, Finding, IdGenerator, Result,
    WaveDefaults, WaveStatus,
};
use cadence_metrics::PerformanceTracker;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Caller options for `execute_wave`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveOptions {
    pub monitor_progress: bool,
    pub enable_rollback: bool,
}

impl Default for WaveOptions {
    fn default() -> Self {
        Self {
            monitor_progress: true,
            enable_rollback: true,
        }
    }
}

/// One participant's share of a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub participant: String,
    pub success: bool,
    pub quality: f64,
    pub error: Option<String>,
}

/// Outcome of one executed phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePhaseResult {
    pub phase_id: String,
    pub name: String,
    pub success: bool,
    pub success_rate: f64,
    pub criteria_satisfied: bool,
    pub participants: Vec<ParticipantResult>,
    pub outputs: HashMap<String, Value>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
    /// The phase deadline elapsed before participants finished
    pub timed_out: bool,
}

/// A live wave execution
#[derive(Debug, Clone)]
struct WaveExecution {
    wave_id: String,
    plan: WavePlan,
    status: WaveStatus,
    current_phase: Option<String>,
    completed_phases: Vec<WavePhaseResult>,
    context: ExecutionContext,
    start_time: DateTime<Utc>,
}

/// Point-in-time progress for `get_wave_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveStatusReport {
    pub wave_id: String,
    pub status: WaveStatus,
    pub strategy: WaveStrategy,
    pub current_phase: Option<String>,
    pub completed_phases: usize,
    pub total_phases: usize,
    /// completed / total
    pub progress: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Final outcome of a completed wave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveReport {
    pub wave_id: String,
    pub status: WaveStatus,
    pub strategy: WaveStrategy,
    pub phase_results: Vec<WavePhaseResult>,
    /// Phase outputs merged in execution order
    pub outputs: HashMap<String, Value>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    pub quality: f64,
    pub duration_ms: u64,
}

/// Outcome of `rollback_wave_phase`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveRollbackReport {
    pub wave_id: String,
    pub target_phase: usize,
    pub rolled_back_phases: Vec<usize>,
    pub surviving_checkpoints: Vec<String>,
    pub status: WaveStatus,
}

/// Drives waves phase by phase with checkpointing and rollback
pub struct WaveEngine {
    executions: RwLock<HashMap<String, WaveExecution>>,
    checkpoints: Arc<CheckpointManager>,
    resources: Arc<ResourceManager>,
    worker: Arc<dyn PersonaWorker>,
    tracker: Arc<PerformanceTracker>,
    preserver: Arc<dyn ContextPreserver>,
    ids: Arc<dyn IdGenerator>,
    defaults: WaveDefaults,
}

impl WaveEngine {
    pub fn new(
        defaults: WaveDefaults,
        checkpoints: Arc<CheckpointManager>,
        resources: Arc<ResourceManager>,
        worker: Arc<dyn PersonaWorker>,
        tracker: Arc<PerformanceTracker>,
        preserver: Arc<dyn ContextPreserver>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            checkpoints,
            resources,
            worker,
            tracker,
            preserver,
            ids,
            defaults,
        }
    }

    /// Score the operation, pick (or accept) a strategy, build phases
    pub fn create_wave_plan(
        &self,
        profile: OperationProfile,
        strategy: Option<WaveStrategy>,
    ) -> Result<WavePlan> {
        phases::create_wave_plan(profile, strategy)
    }

    /// Execute all phases of a plan in order.
    ///
    /// Resources are allocated up front and released on every exit path.
    pub async fn execute_wave(
        &self,
        plan: WavePlan,
        options: WaveOptions,
        context: ExecutionContext,
    ) -> Result<WaveReport> {
        let running = self.active_count().await;
        if running >= self.defaults.max_concurrent_executions {
            return Err(CadenceError::Validation(format!(
                "Wave capacity exhausted: {} executions already running",
                running
            )));
        }
        if plan.phases.is_empty() {
            return Err(CadenceError::Validation(
                "Wave plan has no phases".to_string(),
            ));
        }

        let wave_id = self.ids.next("wave");
        let allocation = self
            .resources
            .allocate(ExecutionKind::Wave, plan.resources.clone())
            .await?;

        let execution = WaveExecution {
            wave_id: wave_id.clone(),
            current_phase: Some(plan.phases[0].phase_id.clone()),
            plan,
            status: WaveStatus::Running,
            completed_phases: Vec::new(),
            context,
            start_time: Utc::now(),
        };
        self.executions
            .write()
            .await
            .insert(wave_id.clone(), execution);

        info!("Wave {} started", wave_id);
        let outcome = self.drive(&wave_id, &options).await;

        // Paired release regardless of how the wave ended
        if let Err(e) = self.resources.release(&allocation.allocation_id).await {
            warn!("Wave {} release failed: {}", wave_id, e);
        }
        outcome
    }

    async fn drive(&self, wave_id: &str, options: &WaveOptions) -> Result<WaveReport> {
        loop {
            let (phase_index, total, handling) = {
                let executions = self.executions.read().await;
                let execution = self.get_execution(&executions, wave_id)?;
                (
                    execution.completed_phases.len(),
                    execution.plan.phases.len(),
                    execution.plan.strategy.failure_handling(),
                )
            };
            if phase_index >= total {
                break;
            }

            let mut result = self.coordinate_wave_phase(wave_id).await?;
            if !result.success {
                let profile = classify_phase_failure(result.timed_out);
                match choose_wave_recovery(profile, handling) {
                    WaveRecovery::Retry => {
                        warn!(
                            "Wave {} phase {} timed out, retrying once",
                            wave_id, result.phase_id
                        );
                        result = self.coordinate_wave_phase(wave_id).await?;
                        if !result.success {
                            return self.fail_wave(wave_id, options, &result, true).await;
                        }
                    }
                    WaveRecovery::Skip => {
                        warn!(
                            "Wave {} phase {} failed, continuing per strategy",
                            wave_id, result.phase_id
                        );
                    }
                    WaveRecovery::Fallback => {
                        warn!(
                            "Wave {} phase {} failed unrecoverably, falling back",
                            wave_id, result.phase_id
                        );
                        return self.fail_wave(wave_id, options, &result, true).await;
                    }
                    WaveRecovery::Abort => {
                        return self.fail_wave(wave_id, options, &result, false).await;
                    }
                }
            }
            self.commit_phase(wave_id, result).await?;
        }
        self.complete(wave_id).await
    }

    /// Execute the next pending phase of a running wave.
    ///
    /// Does not mutate execution state; the caller commits successful
    /// results. Fails with a validation error on a non-running wave.
    pub async fn coordinate_wave_phase(&self, wave_id: &str) -> Result<WavePhaseResult> {
        let (phase, context) = {
            let executions = self.executions.read().await;
            let execution = self.get_execution(&executions, wave_id)?;
            if execution.status != WaveStatus::Running {
                return Err(CadenceError::Validation(format!(
                    "Wave {} is not running (status {})",
                    wave_id, execution.status
                )));
            }
            let index = execution.completed_phases.len();
            let phase = execution.plan.phases.get(index).cloned().ok_or_else(|| {
                CadenceError::Validation(format!("Wave {} has no pending phases", wave_id))
            })?;
            (phase, execution.context.clone())
        };

        let started = Utc::now();
        let participants = phase.participants();
        let work = self.run_participants(&phase, &participants, &context);
        let (gathered, timed_out) = match tokio::time::timeout(
            std::time::Duration::from_millis(phase.timeout_ms),
            work,
        )
        .await
        {
            Ok(gathered) => (gathered, false),
            Err(_) => (
                participants
                    .iter()
                    .map(|p| {
                        (
                            ParticipantResult {
                                participant: p.clone(),
                                success: false,
                                quality: 0.0,
                                error: Some("phase timeout".to_string()),
                            },
                            None,
                        )
                    })
                    .collect(),
                true,
            ),
        };

        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        Ok(summarize_phase(
            &phase,
            gathered,
            duration_ms,
            timed_out,
            &self.defaults,
        ))
    }

    /// Fan out for a parallel phase, run in order for a sequential one.
    /// Best-effort either way: a participant failure never aborts siblings.
    async fn run_participants(
        &self,
        phase: &WavePhase,
        participants: &[String],
        context: &ExecutionContext,
    ) -> Vec<(ParticipantResult, Option<WorkOutput>)> {
        if phase.parallel {
            let futures: Vec<_> = participants
                .iter()
                .map(|participant| {
                    let worker = Arc::clone(&self.worker);
                    let participant = participant.clone();
                    let name = phase.name.clone();
                    let criteria = phase.validation_criteria.clone();
                    let context = context.clone();
                    async move {
                        let outcome = worker
                            .execute(&participant, &name, &criteria, &context)
                            .await;
                        wrap_participant(participant, outcome)
                    }
                })
                .collect();
            join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(participants.len());
            for participant in participants {
                let outcome = self
                    .worker
                    .execute(participant, &phase.name, &phase.validation_criteria, context)
                    .await;
                results.push(wrap_participant(participant.clone(), outcome));
            }
            results
        }
    }

    /// Record a phase result: checkpoint, merge outputs, advance pointer
    async fn commit_phase(&self, wave_id: &str, result: WavePhaseResult) -> Result<()> {
        let (context, phase_index, rollback_scope) = {
            let executions = self.executions.read().await;
            let execution = self.get_execution(&executions, wave_id)?;
            let index = execution.completed_phases.len();
            let scope = execution
                .plan
                .phases
                .get(index)
                .map(|p| p.rollback_scope)
                .unwrap_or(RollbackScope::Phase);
            (execution.context.clone(), index, scope)
        };

        let derived = context.derive(&result.outputs);
        if result.success {
            let state = json!({
                "phase": result.name,
                "outputs": result.outputs,
                "success_rate": result.success_rate,
            });
            self.checkpoints
                .create_checkpoint(
                    wave_id,
                    &result.phase_id,
                    phase_index,
                    state,
                    &derived,
                    rollback_scope,
                )
                .await?;

            let mut metadata = HashMap::new();
            metadata.insert("phase".to_string(), json!(result.name));
            metadata.insert("success_rate".to_string(), json!(result.success_rate));
            if let Err(e) = self
                .preserver
                .preserve_context(wave_id, &derived, metadata)
                .await
            {
                warn!("Wave {} context preservation failed: {}", wave_id, e);
            }
        }

        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(wave_id)
            .ok_or_else(|| CadenceError::NotFound(format!("wave {}", wave_id)))?;
        execution.completed_phases.push(result);
        execution.context = derived;
        execution.current_phase = execution
            .plan
            .phases
            .get(execution.completed_phases.len())
            .map(|p| p.phase_id.clone());
        Ok(())
    }

    /// Terminate a wave after an unrecovered phase failure.
    ///
    /// Fallback recovery restores the last good checkpoint before
    /// stopping; an aborting strategy stops as-is.
    async fn fail_wave(
        &self,
        wave_id: &str,
        options: &WaveOptions,
        failed: &WavePhaseResult,
        attempt_rollback: bool,
    ) -> Result<WaveReport> {
        let rolled_back = if attempt_rollback
            && options.enable_rollback
            && self.defaults.enable_rollback
        {
            match self.checkpoints.latest_valid(wave_id).await {
                Some(checkpoint) => {
                    let total = {
                        let executions = self.executions.read().await;
                        self.get_execution(&executions, wave_id)?.plan.phases.len()
                    };
                    self.checkpoints
                        .rollback_to(&checkpoint.checkpoint_id, total, &[])
                        .await?;
                    self.restore_from(wave_id, &checkpoint.context, checkpoint.phase_index)
                        .await?;
                    true
                }
                None => false,
            }
        } else {
            false
        };

        let status = if rolled_back {
            WaveStatus::RolledBack
        } else {
            WaveStatus::Failed
        };
        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(wave_id) {
                execution.status = status;
            }
        }

        warn!(
            "Wave {} phase {} failed (success rate {:.2}), wave {}",
            wave_id, failed.phase_id, failed.success_rate, status
        );
        Err(CadenceError::PhaseFailed(format!(
            "wave {} phase {}",
            wave_id, failed.phase_id
        )))
    }

    async fn restore_from(
        &self,
        wave_id: &str,
        context: &ExecutionContext,
        phase_index: usize,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(wave_id)
            .ok_or_else(|| CadenceError::NotFound(format!("wave {}", wave_id)))?;
        execution.completed_phases.truncate(phase_index + 1);
        execution.context = context.clone();
        execution.current_phase = execution
            .plan
            .phases
            .get(phase_index)
            .map(|p| p.phase_id.clone());
        Ok(())
    }

    async fn complete(&self, wave_id: &str) -> Result<WaveReport> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(wave_id)
            .ok_or_else(|| CadenceError::NotFound(format!("wave {}", wave_id)))?;
        execution.status = WaveStatus::Completed;
        execution.current_phase = None;

        let duration_ms = (Utc::now() - execution.start_time)
            .num_milliseconds()
            .max(0) as u64;

        let mut outputs = HashMap::new();
        let mut findings = Vec::new();
        let mut recommendations = Vec::new();
        let mut qualities = Vec::new();
        for phase in &execution.completed_phases {
            for (key, value) in &phase.outputs {
                outputs.insert(key.clone(), value.clone());
            }
            findings.extend(phase.findings.iter().cloned());
            for rec in &phase.recommendations {
                if !recommendations.contains(rec) {
                    recommendations.push(rec.clone());
                }
            }
            qualities.extend(
                phase
                    .participants
                    .iter()
                    .filter(|p| p.success)
                    .map(|p| p.quality),
            );
        }
        let quality = if qualities.is_empty() {
            0.0
        } else {
            qualities.iter().sum::<f64>() / qualities.len() as f64
        };

        self.tracker
            .record_wave_coordination(wave_id, duration_ms)
            .await;
        info!(
            "Wave {} completed: {} phases, quality {:.2}",
            wave_id,
            execution.completed_phases.len(),
            quality
        );

        Ok(WaveReport {
            wave_id: wave_id.to_string(),
            status: WaveStatus::Completed,
            strategy: execution.plan.strategy,
            phase_results: execution.completed_phases.clone(),
            outputs,
            findings,
            recommendations,
            quality,
            duration_ms,
        })
    }

    /// Progress snapshot; estimated completion interpolated from elapsed
    /// time and progress while the wave is running.
    pub async fn get_wave_status(&self, wave_id: &str) -> Result<WaveStatusReport> {
        let executions = self.executions.read().await;
        let execution = self.get_execution(&executions, wave_id)?;

        let total = execution.plan.phases.len();
        let completed = execution.completed_phases.len();
        let progress = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };

        let estimated_completion = if execution.status == WaveStatus::Running && progress > 0.0 {
            let elapsed = Utc::now() - execution.start_time;
            let projected_ms = (elapsed.num_milliseconds() as f64 / progress) as i64;
            Some(execution.start_time + Duration::milliseconds(projected_ms))
        } else {
            None
        };

        Ok(WaveStatusReport {
            wave_id: execution.wave_id.clone(),
            status: execution.status,
            strategy: execution.plan.strategy,
            current_phase: execution.current_phase.clone(),
            completed_phases: completed,
            total_phases: total,
            progress,
            estimated_completion,
        })
    }

    /// Roll a wave back to a completed phase.
    ///
    /// Truncates completed phases to the target index, points the wave at
    /// that phase, and transitions it back to running. State restoration
    /// follows the checkpoint's stored scope; `none` only retains the
    /// checkpoint for audit.
    pub async fn rollback_wave_phase(
        &self,
        wave_id: &str,
        target_phase: usize,
        preserve_checkpoints: &[String],
    ) -> Result<WaveRollbackReport> {
        let total = {
            let executions = self.executions.read().await;
            let execution = self.get_execution(&executions, wave_id)?;
            if target_phase >= execution.completed_phases.len() {
                return Err(CadenceError::Validation(format!(
                    "Phase index {} has not completed in wave {}",
                    target_phase, wave_id
                )));
            }
            execution.plan.phases.len()
        };

        let checkpoint = self
            .checkpoints
            .at_phase(wave_id, target_phase)
            .await
            .ok_or_else(|| {
                CadenceError::Checkpoint(format!(
                    "No checkpoint at phase {} of wave {}",
                    target_phase, wave_id
                ))
            })?;

        let outcome = self
            .checkpoints
            .rollback_to(&checkpoint.checkpoint_id, total, preserve_checkpoints)
            .await?;

        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(wave_id)
            .ok_or_else(|| CadenceError::NotFound(format!("wave {}", wave_id)))?;
        execution.completed_phases.truncate(target_phase + 1);
        execution.current_phase = execution
            .plan
            .phases
            .get(target_phase)
            .map(|p| p.phase_id.clone());
        if checkpoint.rollback_scope != RollbackScope::None {
            execution.context = checkpoint.context.clone();
        }
        execution.status = WaveStatus::Running;

        info!(
            "Wave {} rolled back to phase {} ({} phases affected)",
            wave_id,
            target_phase,
            outcome.rolled_back_phases.len()
        );

        Ok(WaveRollbackReport {
            wave_id: wave_id.to_string(),
            target_phase,
            rolled_back_phases: outcome.rolled_back_phases,
            surviving_checkpoints: outcome.surviving_checkpoints,
            status: WaveStatus::Running,
        })
    }

    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.status == WaveStatus::Running)
            .count()
    }

    fn get_execution<'a>(
        &self,
        executions: &'a HashMap<String, WaveExecution>,
        wave_id: &str,
    ) -> Result<&'a WaveExecution> {
        executions
            .get(wave_id)
            .ok_or_else(|| CadenceError::NotFound(format!("wave {}", wave_id)))
    }
}

fn wrap_participant(
    participant: String,
    outcome: Result<WorkOutput>,
) -> (ParticipantResult, Option<WorkOutput>) {
    match outcome {
        Ok(output) => (
            ParticipantResult {
                participant,
                success: true,
                quality: output.quality,
                error: None,
            },
            Some(output),
        ),
        Err(e) => (
            ParticipantResult {
                participant,
                success: false,
                quality: 0.0,
                error: Some(e.to_string()),
            },
            None,
        ),
    }
}

/// Phase success requires the configured participant success rate and
/// every validation criterion satisfied by at least one participant.
fn summarize_phase(
    phase: &WavePhase,
    gathered: Vec<(ParticipantResult, Option<WorkOutput>)>,
    duration_ms: u64,
    timed_out: bool,
    defaults: &WaveDefaults,
) -> WavePhaseResult {
    let mut participants = Vec::with_capacity(gathered.len());
    let mut outputs = HashMap::new();
    let mut findings: Vec<Finding> = Vec::new();
    let mut recommendations = Vec::new();
    let mut criteria_met = Vec::new();

    for (participant, output) in gathered {
        if let Some(output) = output {
            for (key, value) in output.output {
                outputs.insert(key, value);
            }
            findings.extend(output.findings);
            for rec in output.recommendations {
                if !recommendations.contains(&rec) {
                    recommendations.push(rec);
                }
            }
            criteria_met.extend(output.criteria_met);
        }
        participants.push(participant);
    }

    let success_rate = if participants.is_empty() {
        0.0
    } else {
        participants.iter().filter(|p| p.success).count() as f64 / participants.len() as f64
    };
    let criteria_satisfied = phase
        .validation_criteria
        .iter()
        .all(|c| criteria_met.contains(c));
    let success = success_rate >= defaults.phase_success_rate && criteria_satisfied;

    WavePhaseResult {
        phase_id: phase.phase_id.clone(),
        name: phase.name.clone(),
        success,
        success_rate,
        criteria_satisfied,
        participants,
        outputs,
        findings,
        recommendations,
        duration_ms,
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_agent::DeterministicWorker;
    use cadence_core::{CheckpointRetention, InMemoryPreserver, ResourceDefaults, SequentialIds};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn engine_preserving(
        worker: Arc<dyn PersonaWorker>,
        preserver: Arc<dyn ContextPreserver>,
    ) -> WaveEngine {
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::new());
        WaveEngine::new(
            WaveDefaults::default(),
            Arc::new(CheckpointManager::new(
                CheckpointRetention::default(),
                Arc::clone(&ids),
            )),
            Arc::new(ResourceManager::new(
                ResourceDefaults::default(),
                Arc::clone(&ids),
            )),
            worker,
            Arc::new(PerformanceTracker::new()),
            preserver,
            ids,
        )
    }

    fn engine_with(worker: Arc<dyn PersonaWorker>) -> WaveEngine {
        engine_preserving(worker, Arc::new(InMemoryPreserver::new()))
    }

    fn engine() -> WaveEngine {
        engine_with(Arc::new(DeterministicWorker))
    }

    /// Fails every participant whose name matches
    struct FailingWorker {
        fail_persona: String,
    }

    #[async_trait]
    impl PersonaWorker for FailingWorker {
        async fn execute(
            &self,
            persona: &str,
            operation: &str,
            criteria: &[String],
            context: &ExecutionContext,
        ) -> Result<WorkOutput> {
            if persona == self.fail_persona {
                return Err(CadenceError::Agent(format!("{} unavailable", persona)));
            }
            DeterministicWorker
                .execute(persona, operation, criteria, context)
                .await
        }
    }

    #[tokio::test]
    async fn test_wave_completes_all_phases() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("refactor module", 0.6), None)
            .unwrap();
        let total = plan.phases.len();

        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "refactor"),
            )
            .await
            .unwrap();

        assert_eq!(report.status, WaveStatus::Completed);
        assert_eq!(report.phase_results.len(), total);
        assert!(report.phase_results.iter().all(|p| p.success));
        assert!(report.quality > 0.0);
    }

    #[tokio::test]
    async fn test_phase_outputs_flow_forward() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();

        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        // Outputs from every phase appear in the aggregate
        assert!(report
            .outputs
            .keys()
            .any(|k| k.contains("assessment") || k.contains("analyzer")));
    }

    #[tokio::test]
    async fn test_status_reports_progress_and_terminal_state() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        let status = engine.get_wave_status(&report.wave_id).await.unwrap();
        assert_eq!(status.status, WaveStatus::Completed);
        assert_eq!(status.progress, 1.0);
        assert!(status.current_phase.is_none());
    }

    #[tokio::test]
    async fn test_coordinate_on_completed_wave_is_validation_error() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        let err = engine
            .coordinate_wave_phase(&report.wave_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rollback_truncates_and_resumes() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let phase_0 = plan.phases[0].phase_id.clone();
        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        let rollback = engine
            .rollback_wave_phase(&report.wave_id, 0, &[])
            .await
            .unwrap();
        assert_eq!(rollback.status, WaveStatus::Running);

        let status = engine.get_wave_status(&report.wave_id).await.unwrap();
        assert_eq!(status.completed_phases, 1);
        assert_eq!(status.current_phase, Some(phase_0));
        assert_eq!(status.status, WaveStatus::Running);
    }

    #[tokio::test]
    async fn test_rollback_to_unexecuted_phase_rejected() {
        let engine = engine();
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        assert!(engine
            .rollback_wave_phase(&report.wave_id, 99, &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_phase_fails_wave_without_checkpoint() {
        // Analyzer participates in the first phase; with no completed
        // phase there is no checkpoint, so the wave just fails.
        let engine = engine_with(Arc::new(FailingWorker {
            fail_persona: "analyzer".to_string(),
        }));
        let plan = engine
            .create_wave_plan(
                OperationProfile::new("tidy", 0.2),
                Some(WaveStrategy::Enterprise),
            )
            .unwrap();
        let wave_count = plan.phases.len();
        assert_eq!(wave_count, 5);

        let err = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::PhaseFailed(_)));
    }

    #[tokio::test]
    async fn test_progressive_continues_past_failed_phase() {
        // Progressive strategy records the failure and keeps going
        let engine = engine_with(Arc::new(FailingWorker {
            fail_persona: "refactorer".to_string(),
        }));
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        assert_eq!(plan.strategy, WaveStrategy::Progressive);

        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();
        assert_eq!(report.status, WaveStatus::Completed);
        assert!(report.phase_results.iter().any(|p| !p.success));
    }

    /// Fails one persona with a validation error and counts its calls
    struct ValidationFailWorker {
        fail_persona: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PersonaWorker for ValidationFailWorker {
        async fn execute(
            &self,
            persona: &str,
            operation: &str,
            criteria: &[String],
            context: &ExecutionContext,
        ) -> Result<WorkOutput> {
            if persona == self.fail_persona {
                self.calls.fetch_add(1, Ordering::SeqCst);
                return Err(CadenceError::Validation(format!("{} rejected input", persona)));
            }
            DeterministicWorker
                .execute(persona, operation, criteria, context)
                .await
        }
    }

    /// Stalls the first call past any reasonable phase deadline
    struct SlowOnceWorker {
        slow: AtomicBool,
    }

    #[async_trait]
    impl PersonaWorker for SlowOnceWorker {
        async fn execute(
            &self,
            persona: &str,
            operation: &str,
            criteria: &[String],
            context: &ExecutionContext,
        ) -> Result<WorkOutput> {
            if self.slow.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            DeterministicWorker
                .execute(persona, operation, criteria, context)
                .await
        }
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        // A retry-handling strategy only re-runs timed-out phases; a
        // validation failure in the first phase executes exactly once.
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = engine_with(Arc::new(ValidationFailWorker {
            fail_persona: "analyzer".to_string(),
            calls: Arc::clone(&calls),
        }));
        let plan = engine
            .create_wave_plan(
                OperationProfile::new("tidy", 0.2),
                Some(WaveStrategy::Systematic),
            )
            .unwrap();

        let err = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::PhaseFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_falls_back_to_checkpoint() {
        // Refactorer joins in the third phase; the two earlier phases
        // leave checkpoints, so the wave restores and reports rolled back.
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = engine_with(Arc::new(ValidationFailWorker {
            fail_persona: "refactorer".to_string(),
            calls: Arc::clone(&calls),
        }));
        let plan = engine
            .create_wave_plan(
                OperationProfile::new("tidy", 0.2),
                Some(WaveStrategy::Systematic),
            )
            .unwrap();

        let err = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::PhaseFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let wave_id = match &err {
            CadenceError::PhaseFailed(msg) => {
                msg.split_whitespace().nth(1).unwrap().to_string()
            }
            _ => unreachable!(),
        };
        let status = engine.get_wave_status(&wave_id).await.unwrap();
        assert_eq!(status.status, WaveStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_timed_out_phase_is_retried_once() {
        let engine = engine_with(Arc::new(SlowOnceWorker {
            slow: AtomicBool::new(true),
        }));
        let mut plan = engine
            .create_wave_plan(
                OperationProfile::new("tidy", 0.2),
                Some(WaveStrategy::Systematic),
            )
            .unwrap();
        plan.phases[0].timeout_ms = 100;

        let report = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();
        assert_eq!(report.status, WaveStatus::Completed);
        assert!(report.phase_results[0].success);
        assert!(!report.phase_results[0].timed_out);
    }

    #[tokio::test]
    async fn test_abort_strategy_stops_without_restoration() {
        // Enterprise aborts on failure: the discovery checkpoint stays
        // untouched and the wave ends failed, not rolled back.
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = engine_with(Arc::new(ValidationFailWorker {
            fail_persona: "security".to_string(),
            calls: Arc::clone(&calls),
        }));
        let plan = engine
            .create_wave_plan(
                OperationProfile::new("tidy", 0.2),
                Some(WaveStrategy::Enterprise),
            )
            .unwrap();

        let err = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let wave_id = match &err {
            CadenceError::PhaseFailed(msg) => {
                msg.split_whitespace().nth(1).unwrap().to_string()
            }
            _ => unreachable!(),
        };
        let status = engine.get_wave_status(&wave_id).await.unwrap();
        assert_eq!(status.status, WaveStatus::Failed);
    }

    #[tokio::test]
    async fn test_context_preserved_after_each_phase() {
        let preserver = Arc::new(InMemoryPreserver::new());
        let engine = engine_preserving(
            Arc::new(DeterministicWorker),
            Arc::clone(&preserver) as Arc<dyn ContextPreserver>,
        );
        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let total = plan.phases.len();

        engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();

        assert_eq!(preserver.snapshot_count().await, total);
    }

    #[tokio::test]
    async fn test_capacity_guard() {
        let mut defaults = WaveDefaults::default();
        defaults.max_concurrent_executions = 0;
        let ids: Arc<dyn IdGenerator> = Arc::new(SequentialIds::new());
        let engine = WaveEngine::new(
            defaults,
            Arc::new(CheckpointManager::new(
                CheckpointRetention::default(),
                Arc::clone(&ids),
            )),
            Arc::new(ResourceManager::new(
                ResourceDefaults::default(),
                Arc::clone(&ids),
            )),
            Arc::new(DeterministicWorker),
            Arc::new(PerformanceTracker::new()),
            Arc::new(InMemoryPreserver::new()),
            ids,
        );

        let plan = engine
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let err = engine
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }
}
