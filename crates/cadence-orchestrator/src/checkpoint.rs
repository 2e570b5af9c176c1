//! Checkpoint manager: capture and restore phase state
//!
//! One checkpoint is created per completed wave phase. Each carries a
//! lightweight integrity validation and a rollback scope that decides how
//! much state a rollback restores.

use cadence_core::{
    CadenceError, CheckpointRetention, ExecutionContext, IdGenerator, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// How much state a rollback to this checkpoint restores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Restore just this phase's state
    #[default]
    Phase,
    /// Restore this phase and all accumulated state after it
    Wave,
    /// No restoration; checkpoint retained for audit only
    None,
}

/// Lightweight integrity validation captured with each checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointValidation {
    pub state_complete: bool,
    pub context_intact: bool,
    pub resource_usage_ok: bool,
}

impl CheckpointValidation {
    pub fn passed(&self) -> bool {
        self.state_complete && self.context_intact && self.resource_usage_ok
    }
}

/// A captured, restorable snapshot of a phase's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub checkpoint_id: String,
    pub wave_id: String,
    pub phase_id: String,
    pub phase_index: usize,
    pub timestamp: DateTime<Utc>,
    /// Phase output at checkpoint time
    pub state: Value,
    /// Context snapshot at checkpoint time
    pub context: ExecutionContext,
    pub validation: CheckpointValidation,
    pub rollback_scope: RollbackScope,
}

/// Result of a rollback operation
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub checkpoint: CheckpointData,
    /// Phase indices whose state was rolled back
    pub rolled_back_phases: Vec<usize>,
    /// Checkpoint IDs still stored after the rollback
    pub surviving_checkpoints: Vec<String>,
}

/// Stores checkpoints per wave and executes rollback scopes
pub struct CheckpointManager {
    // Keyed by wave ID, ordered by phase index
    checkpoints: RwLock<HashMap<String, Vec<CheckpointData>>>,
    ids: Arc<dyn IdGenerator>,
    retention: CheckpointRetention,
}

impl CheckpointManager {
    pub fn new(retention: CheckpointRetention, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            ids,
            retention,
        }
    }

    /// Capture phase output and context after a completed phase
    pub async fn create_checkpoint(
        &self,
        wave_id: &str,
        phase_id: &str,
        phase_index: usize,
        state: Value,
        context: &ExecutionContext,
        rollback_scope: RollbackScope,
    ) -> Result<CheckpointData> {
        let validation = validate_snapshot(&state, context);

        let checkpoint = CheckpointData {
            checkpoint_id: self.ids.next("ckpt"),
            wave_id: wave_id.to_string(),
            phase_id: phase_id.to_string(),
            phase_index,
            timestamp: Utc::now(),
            state,
            context: context.clone(),
            validation,
            rollback_scope,
        };

        debug!(
            "Checkpoint {} created for wave {} phase {} (scope {:?})",
            checkpoint.checkpoint_id, wave_id, phase_id, rollback_scope
        );

        let mut store = self.checkpoints.write().await;
        let entries = store.entry(wave_id.to_string()).or_default();
        entries.push(checkpoint.clone());
        entries.sort_by_key(|c| c.phase_index);
        Ok(checkpoint)
    }

    pub async fn get(&self, checkpoint_id: &str) -> Option<CheckpointData> {
        self.checkpoints
            .read()
            .await
            .values()
            .flatten()
            .find(|c| c.checkpoint_id == checkpoint_id)
            .cloned()
    }

    /// Latest checkpoint for a wave that passed integrity validation
    pub async fn latest_valid(&self, wave_id: &str) -> Option<CheckpointData> {
        self.checkpoints
            .read()
            .await
            .get(wave_id)?
            .iter()
            .rev()
            .find(|c| c.validation.passed())
            .cloned()
    }

    /// Checkpoint taken at a specific phase index of a wave
    pub async fn at_phase(&self, wave_id: &str, phase_index: usize) -> Option<CheckpointData> {
        self.checkpoints
            .read()
            .await
            .get(wave_id)?
            .iter()
            .find(|c| c.phase_index == phase_index)
            .cloned()
    }

    /// Resolve the affected-phase scope of a checkpoint's stored strategy
    pub fn affected_phases(checkpoint: &CheckpointData, total_phases: usize) -> Vec<usize> {
        match checkpoint.rollback_scope {
            RollbackScope::Phase => vec![checkpoint.phase_index],
            RollbackScope::Wave => (checkpoint.phase_index..total_phases).collect(),
            RollbackScope::None => Vec::new(),
        }
    }

    /// Roll back to a checkpoint.
    ///
    /// Drops checkpoints for phases after the target (unless explicitly
    /// preserved), validates the restored snapshot, and reports what was
    /// rolled back and what survives.
    pub async fn rollback_to(
        &self,
        checkpoint_id: &str,
        total_phases: usize,
        preserve: &[String],
    ) -> Result<RollbackOutcome> {
        let checkpoint = self.get(checkpoint_id).await.ok_or_else(|| {
            CadenceError::Checkpoint(format!("Unknown checkpoint: {}", checkpoint_id))
        })?;

        if !checkpoint.validation.passed() {
            return Err(CadenceError::RollbackFailed(format!(
                "Checkpoint {} failed integrity validation",
                checkpoint_id
            )));
        }

        let rolled_back_phases = Self::affected_phases(&checkpoint, total_phases);

        let mut store = self.checkpoints.write().await;
        let entries = store.entry(checkpoint.wave_id.clone()).or_default();
        entries.retain(|c| {
            c.phase_index <= checkpoint.phase_index
                || preserve.contains(&c.checkpoint_id)
        });
        let surviving_checkpoints = entries.iter().map(|c| c.checkpoint_id.clone()).collect();

        info!(
            "Rolled back wave {} to checkpoint {} ({} phases affected)",
            checkpoint.wave_id,
            checkpoint_id,
            rolled_back_phases.len()
        );

        Ok(RollbackOutcome {
            checkpoint,
            rolled_back_phases,
            surviving_checkpoints,
        })
    }

    /// Remove checkpoints older than the max age, always keeping at
    /// least the configured minimum per wave. Returns how many were removed.
    pub async fn retention_sweep(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.retention.max_age_secs as i64);
        let min_keep = self.retention.min_keep;

        let mut removed = 0;
        let mut store = self.checkpoints.write().await;
        for entries in store.values_mut() {
            if entries.len() <= min_keep {
                continue;
            }
            let removable = entries.len() - min_keep;
            let mut dropped = 0;
            // Entries are ordered by phase index; oldest timestamps first
            entries.retain(|c| {
                if dropped < removable && c.timestamp < cutoff {
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
            removed += dropped;
        }
        if removed > 0 {
            info!("Retention sweep removed {} checkpoints", removed);
        }
        removed
    }

    /// Drop all checkpoints for a wave
    pub async fn remove_wave(&self, wave_id: &str) {
        self.checkpoints.write().await.remove(wave_id);
    }

    pub async fn count_for(&self, wave_id: &str) -> usize {
        self.checkpoints
            .read()
            .await
            .get(wave_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// State completeness, context integrity, non-negative resource usage
fn validate_snapshot(state: &Value, context: &ExecutionContext) -> CheckpointValidation {
    let state_complete = !state.is_null();
    let context_intact = !context.execution_id.is_empty();
    let resource_usage_ok = state
        .get("resource_usage")
        .and_then(|usage| usage.as_object())
        .map(|usage| {
            usage
                .values()
                .filter_map(|v| v.as_f64())
                .all(|v| v >= 0.0)
        })
        .unwrap_or(true);

    CheckpointValidation {
        state_complete,
        context_intact,
        resource_usage_ok,
    }
}
