//! Wave planning: complexity scoring, strategy selection, phase builders
//!
//! A wave plan is built from an operation profile. The profile's complexity
//! score picks a strategy (unless the caller forces one), and each strategy
//! has its own phase builder tuned to its thoroughness.

use crate::checkpoint::RollbackScope;
use crate::resource::ResourceRequirements;
use cadence_core::{CadenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wave execution strategy, ordered by thoroughness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStrategy {
    Progressive,
    Systematic,
    Adaptive,
    Enterprise,
}

impl fmt::Display for WaveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressive => write!(f, "progressive"),
            Self::Systematic => write!(f, "systematic"),
            Self::Adaptive => write!(f, "adaptive"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl FromStr for WaveStrategy {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "progressive" => Ok(Self::Progressive),
            "systematic" => Ok(Self::Systematic),
            "adaptive" => Ok(Self::Adaptive),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(CadenceError::Validation(format!(
                "Unknown wave strategy: {}",
                other
            ))),
        }
    }
}

/// How a strategy reacts when a phase fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHandling {
    /// Record the failure and move to the next phase
    Continue,
    /// Retry the failed phase once before giving up
    Retry,
    /// Stop the wave immediately
    Abort,
}

impl WaveStrategy {
    pub fn failure_handling(&self) -> FailureHandling {
        match self {
            Self::Progressive => FailureHandling::Continue,
            Self::Systematic | Self::Adaptive => FailureHandling::Retry,
            Self::Enterprise => FailureHandling::Abort,
        }
    }
}

/// Caller-supplied description of the operation a wave will perform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationProfile {
    pub description: String,
    /// Caller's own complexity estimate in [0,1]
    pub base_complexity: f64,
    pub file_count: usize,
    pub domains: Vec<String>,
    pub operation_types: Vec<String>,
}

impl OperationProfile {
    pub fn new(description: impl Into<String>, base_complexity: f64) -> Self {
        Self {
            description: description.into(),
            base_complexity,
            ..Default::default()
        }
    }

    pub fn with_file_count(mut self, file_count: usize) -> Self {
        self.file_count = file_count;
        self
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_operation_types(mut self, operation_types: Vec<String>) -> Self {
        self.operation_types = operation_types;
        self
    }

    fn mentions(&self, keyword: &str) -> bool {
        let description = self.description.to_lowercase();
        description.contains(keyword)
            || self
                .domains
                .iter()
                .chain(self.operation_types.iter())
                .any(|s| s.to_lowercase().contains(keyword))
    }
}

/// Base complexity plus file-count tier, domain, and operation-type bonuses
pub fn complexity_score(profile: &OperationProfile) -> f64 {
    let mut score = profile.base_complexity;
    if profile.file_count > 100 {
        score += 0.3;
    } else if profile.file_count > 50 {
        score += 0.2;
    } else if profile.file_count > 20 {
        score += 0.1;
    }
    score += 0.1 * profile.domains.len() as f64;
    score += 0.05 * profile.operation_types.len() as f64;
    score.clamp(0.0, 1.0)
}

/// Threshold-based strategy selection
pub fn select_strategy(complexity: f64) -> WaveStrategy {
    if complexity >= 0.9 {
        WaveStrategy::Enterprise
    } else if complexity >= 0.7 {
        WaveStrategy::Adaptive
    } else if complexity >= 0.5 {
        WaveStrategy::Systematic
    } else {
        WaveStrategy::Progressive
    }
}

/// One step of a wave plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePhase {
    pub phase_id: String,
    pub name: String,
    pub servers: Vec<String>,
    pub personas: Vec<String>,
    /// Phase IDs that must complete before this phase runs
    pub dependencies: Vec<String>,
    pub parallel: bool,
    pub timeout_ms: u64,
    pub validation_criteria: Vec<String>,
    pub rollback_scope: RollbackScope,
}

impl WavePhase {
    /// Servers and personas together form the fan-out set
    pub fn participants(&self) -> Vec<String> {
        self.servers
            .iter()
            .chain(self.personas.iter())
            .cloned()
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.servers.len() + self.personas.len()
    }
}

/// A fully planned wave, ready for execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePlan {
    pub operation: OperationProfile,
    pub strategy: WaveStrategy,
    pub complexity: f64,
    pub phases: Vec<WavePhase>,
    pub resources: ResourceRequirements,
    pub created_at: DateTime<Utc>,
}

/// Build a plan: score complexity, pick (or accept) a strategy, build phases
pub fn create_wave_plan(
    profile: OperationProfile,
    strategy: Option<WaveStrategy>,
) -> Result<WavePlan> {
    if !(0.0..=1.0).contains(&profile.base_complexity) {
        return Err(CadenceError::Validation(format!(
            "Base complexity {} outside [0,1]",
            profile.base_complexity
        )));
    }

    let complexity = complexity_score(&profile);
    let strategy = strategy.unwrap_or_else(|| select_strategy(complexity));
    let phases = build_phases(strategy, &profile);
    let resources = estimate_resources(&phases);

    Ok(WavePlan {
        operation: profile,
        strategy,
        complexity,
        phases,
        resources,
        created_at: Utc::now(),
    })
}

fn phase(
    index: usize,
    name: &str,
    servers: &[&str],
    personas: &[&str],
    parallel: bool,
    timeout_ms: u64,
    criteria: &[&str],
    previous: Option<&WavePhase>,
) -> WavePhase {
    WavePhase {
        phase_id: format!("phase-{}-{}", index, name),
        name: name.to_string(),
        servers: servers.iter().map(|s| s.to_string()).collect(),
        personas: personas.iter().map(|s| s.to_string()).collect(),
        dependencies: previous.map(|p| vec![p.phase_id.clone()]).unwrap_or_default(),
        parallel,
        timeout_ms,
        validation_criteria: criteria.iter().map(|s| s.to_string()).collect(),
        rollback_scope: RollbackScope::Phase,
    }
}

/// Strategy-specific phase builder
pub fn build_phases(strategy: WaveStrategy, profile: &OperationProfile) -> Vec<WavePhase> {
    match strategy {
        WaveStrategy::Progressive => progressive_phases(),
        WaveStrategy::Systematic => systematic_phases(),
        WaveStrategy::Adaptive => adaptive_phases(profile),
        WaveStrategy::Enterprise => enterprise_phases(),
    }
}

// Three lightweight phases for low-complexity operations
fn progressive_phases() -> Vec<WavePhase> {
    let mut phases = Vec::with_capacity(3);
    phases.push(phase(
        0,
        "assessment",
        &["analysis"],
        &["analyzer"],
        true,
        60_000,
        &["scope_identified"],
        None,
    ));
    phases.push(phase(
        1,
        "improvement",
        &["editing"],
        &["refactorer"],
        true,
        120_000,
        &["changes_applied"],
        phases.last(),
    ));
    phases.push(phase(
        2,
        "validation",
        &["testing"],
        &["qa"],
        true,
        60_000,
        &["checks_passed"],
        phases.last(),
    ));
    phases
}

fn systematic_phases() -> Vec<WavePhase> {
    let mut phases = Vec::with_capacity(4);
    phases.push(phase(
        0,
        "analysis",
        &["analysis", "documentation"],
        &["analyzer", "architect"],
        true,
        120_000,
        &["scope_identified", "risks_catalogued"],
        None,
    ));
    phases.push(phase(
        1,
        "planning",
        &["documentation"],
        &["architect"],
        false,
        90_000,
        &["plan_approved"],
        phases.last(),
    ));
    phases.push(phase(
        2,
        "implementation",
        &["editing", "execution"],
        &["refactorer", "backend"],
        true,
        300_000,
        &["changes_applied"],
        phases.last(),
    ));
    phases.push(phase(
        3,
        "quality_assurance",
        &["testing"],
        &["qa", "analyzer"],
        true,
        180_000,
        &["checks_passed", "regressions_absent"],
        phases.last(),
    ));
    phases
}

// Systematic plus conditional phases injected from operation traits
fn adaptive_phases(profile: &OperationProfile) -> Vec<WavePhase> {
    let mut phases = systematic_phases();

    if profile.mentions("security") {
        let security = phase(
            phases.len(),
            "security_review",
            &["analysis"],
            &["security"],
            true,
            180_000,
            &["vulnerabilities_triaged"],
            phases.last(),
        );
        phases.push(security);
    }
    if profile.mentions("performance") {
        let performance = phase(
            phases.len(),
            "performance_review",
            &["testing"],
            &["performance"],
            true,
            180_000,
            &["bottlenecks_profiled"],
            phases.last(),
        );
        phases.push(performance);
    }
    phases
}

// Five phases with explicit risk assessment and deployment stages
fn enterprise_phases() -> Vec<WavePhase> {
    let mut phases = Vec::with_capacity(5);
    phases.push(phase(
        0,
        "discovery",
        &["analysis", "documentation"],
        &["analyzer", "architect"],
        true,
        180_000,
        &["scope_identified", "stakeholders_mapped"],
        None,
    ));
    phases.push(phase(
        1,
        "risk_assessment",
        &["analysis"],
        &["security", "architect"],
        false,
        120_000,
        &["risks_catalogued", "mitigations_defined"],
        phases.last(),
    ));
    phases.push(phase(
        2,
        "planning",
        &["documentation"],
        &["architect"],
        false,
        120_000,
        &["plan_approved", "rollback_plan_defined"],
        phases.last(),
    ));
    phases.push(phase(
        3,
        "implementation",
        &["editing", "execution"],
        &["refactorer", "backend", "frontend"],
        true,
        600_000,
        &["changes_applied"],
        phases.last(),
    ));
    phases.push(phase(
        4,
        "deployment",
        &["execution", "testing"],
        &["devops", "qa"],
        false,
        300_000,
        &["checks_passed", "deployment_verified"],
        phases.last(),
    ));
    phases
}

/// Additive per-phase estimate: memory/cpu scale with participant count,
/// concurrency is the widest parallel fan-out, timeout the longest phase
pub fn estimate_resources(phases: &[WavePhase]) -> ResourceRequirements {
    const MEMORY_PER_PARTICIPANT_MB: u64 = 256;
    const CPU_PER_PARTICIPANT: u64 = 25;

    let mut memory_mb = 0;
    let mut cpu_units = 0;
    let mut concurrency: u32 = 1;
    let mut timeout_ms = 0;
    for phase in phases {
        let participants = phase.participant_count() as u64;
        memory_mb += participants * MEMORY_PER_PARTICIPANT_MB;
        cpu_units += participants * CPU_PER_PARTICIPANT;
        if phase.parallel {
            concurrency = concurrency.max(phase.participant_count() as u32);
        }
        timeout_ms = timeout_ms.max(phase.timeout_ms);
    }

    ResourceRequirements {
        memory_mb,
        cpu_units,
        concurrency,
        timeout_ms: Some(timeout_ms),
    }
}
