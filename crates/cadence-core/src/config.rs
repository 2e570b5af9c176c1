//! Configuration management for Cadence
//!
//! Provides the thresholds and pool capacities the engines consult at
//! runtime. Loaded from `cadence.toml` when present, otherwise defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// Top-level Cadence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub wave: WaveDefaults,

    #[serde(default, rename = "loop")]
    pub loop_defaults: LoopDefaults,

    #[serde(default)]
    pub chain: ChainDefaults,

    #[serde(default)]
    pub delegation: DelegationDefaults,

    #[serde(default)]
    pub resources: ResourceDefaults,

    #[serde(default)]
    pub checkpoints: CheckpointRetention,
}

/// Wave execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveDefaults {
    /// Minimum fraction of participants that must succeed for a phase to pass
    #[serde(default = "default_phase_success_rate")]
    pub phase_success_rate: f64,

    /// Whether rollback is attempted on phase failure
    #[serde(default = "default_true")]
    pub enable_rollback: bool,

    /// Maximum waves tracked at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

/// Loop convergence defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefaults {
    /// Minimum summed improvement over the stability window before
    /// the loop is considered stagnant
    #[serde(default = "default_quality_improvement")]
    pub quality_improvement_threshold: f64,

    /// Number of trailing iterations used for stability and stagnation
    #[serde(default = "default_stability_window")]
    pub stability_window: usize,

    /// Quality score at which the loop stops as plateaued
    #[serde(default = "default_quality_plateau")]
    pub quality_plateau_threshold: f64,

    /// Convergence confidence at which the loop stops as converged
    #[serde(default = "default_convergence_confidence")]
    pub convergence_confidence_threshold: f64,

    /// Default iteration cap when the caller supplies none
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum loops tracked at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

/// Chain execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefaults {
    /// Maximum chains tracked at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

/// Delegation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationDefaults {
    /// Efficiency at or above which delegation is judged worthwhile
    #[serde(default = "default_efficiency_bar")]
    pub efficiency_bar: f64,

    /// Scope size above which `auto` decomposition groups by folder
    #[serde(default = "default_folder_threshold")]
    pub folder_threshold: usize,

    /// Average item size below which `auto` decomposition goes per-file
    #[serde(default = "default_small_file_bytes")]
    pub small_file_bytes: u64,

    /// Admission window for sub-agent execution
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Per-sub-task timeout in milliseconds
    #[serde(default = "default_sub_task_timeout_ms")]
    pub sub_task_timeout_ms: u64,

    /// Maximum delegations tracked at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
}

/// Resource pool defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefaults {
    /// Memory capacity per pool, in megabytes
    #[serde(default = "default_pool_memory_mb")]
    pub pool_memory_mb: u64,

    /// CPU capacity per pool, in abstract units
    #[serde(default = "default_pool_cpu_units")]
    pub pool_cpu_units: u64,

    /// Concurrency capacity per pool
    #[serde(default = "default_pool_concurrency")]
    pub pool_concurrency: u32,

    /// Utilization at which pressure starts accelerating
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,

    /// Utilization at which pressure saturates
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,

    /// Allocation lifetime when the caller supplies no timeout
    #[serde(default = "default_allocation_expiry_secs")]
    pub allocation_expiry_secs: u64,
}

/// Checkpoint retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRetention {
    /// Checkpoints older than this are eligible for removal
    #[serde(default = "default_checkpoint_max_age_secs")]
    pub max_age_secs: u64,

    /// Never sweep below this many checkpoints per wave
    #[serde(default = "default_checkpoint_min_keep")]
    pub min_keep: usize,
}

fn default_phase_success_rate() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    32
}

fn default_quality_improvement() -> f64 {
    0.01
}

fn default_stability_window() -> usize {
    3
}

fn default_quality_plateau() -> f64 {
    0.95
}

fn default_convergence_confidence() -> f64 {
    0.8
}

fn default_max_iterations() -> u32 {
    10
}

fn default_efficiency_bar() -> f64 {
    0.4
}

fn default_folder_threshold() -> usize {
    50
}

fn default_small_file_bytes() -> u64 {
    1000
}

fn default_concurrency_limit() -> usize {
    7
}

fn default_sub_task_timeout_ms() -> u64 {
    60_000
}

fn default_pool_memory_mb() -> u64 {
    4096
}

fn default_pool_cpu_units() -> u64 {
    400
}

fn default_pool_concurrency() -> u32 {
    16
}

fn default_warning_threshold() -> f64 {
    0.7
}

fn default_critical_threshold() -> f64 {
    0.9
}

fn default_allocation_expiry_secs() -> u64 {
    3600
}

fn default_checkpoint_max_age_secs() -> u64 {
    86_400
}

fn default_checkpoint_min_keep() -> usize {
    3
}

impl CadenceConfig {
    /// Load configuration from `cadence.toml` under `root`, or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join("cadence.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content).map_err(|e| {
                crate::CadenceError::Other(format!("Failed to parse config file: {}", e))
            })?)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `cadence.toml` under `root`
    pub fn write_default(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root)?;
        let config_path = root.join("cadence.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| crate::CadenceError::Other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for WaveDefaults {
    fn default() -> Self {
        Self {
            phase_success_rate: default_phase_success_rate(),
            enable_rollback: true,
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            quality_improvement_threshold: default_quality_improvement(),
            stability_window: default_stability_window(),
            quality_plateau_threshold: default_quality_plateau(),
            convergence_confidence_threshold: default_convergence_confidence(),
            max_iterations: default_max_iterations(),
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl Default for DelegationDefaults {
    fn default() -> Self {
        Self {
            efficiency_bar: default_efficiency_bar(),
            folder_threshold: default_folder_threshold(),
            small_file_bytes: default_small_file_bytes(),
            concurrency_limit: default_concurrency_limit(),
            sub_task_timeout_ms: default_sub_task_timeout_ms(),
            max_concurrent_executions: default_max_concurrent(),
        }
    }
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            pool_memory_mb: default_pool_memory_mb(),
            pool_cpu_units: default_pool_cpu_units(),
            pool_concurrency: default_pool_concurrency(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            allocation_expiry_secs: default_allocation_expiry_secs(),
        }
    }
}

impl Default for CheckpointRetention {
    fn default() -> Self {
        Self {
            max_age_secs: default_checkpoint_max_age_secs(),
            min_keep: default_checkpoint_min_keep(),
        }
    }
}
