//! # cadence-orchestrator
//!
//! The engines of the Cadence orchestration kernel:
//! - Wave orchestration: planned phases with checkpointing and rollback
//! - Loop mode: iterative refinement with convergence detection
//! - Chain mode: ordered persona execution with context handoff
//! - Delegation: scope decomposition, bounded-parallel sub-agents,
//!   aggregated findings
//! - Resource pools with soft admission and graduated pressure
//!
//! Each engine owns its execution map; there is no cross-engine locking.

pub mod chain;
pub mod checkpoint;
pub mod concurrency;
pub mod convergence;
pub mod decompose;
pub mod delegation;
pub mod handoff;
pub mod loop_engine;
pub mod phases;
pub mod recovery;
pub mod resource;
pub mod wave;

pub use chain::{
    ChainConfig, ChainLink, ChainManager, ChainReport, ChainStatusReport, LinkStatus,
};
pub use checkpoint::{
    CheckpointData, CheckpointManager, CheckpointValidation, RollbackOutcome, RollbackScope,
};
pub use concurrency::{ConcurrencyController, TaskOutcome};
pub use convergence::{
    default_gates, ConvergenceMetrics, GateResult, QualityGate, TerminationReason,
};
pub use decompose::{decompose, DecompositionStrategy};
pub use delegation::{
    DelegationEngine, DelegationPlan, DelegationReport, DelegationTask, StrategyConfig,
    SubAgentResult, SubAgentResultStatus,
};
pub use handoff::{
    perform_handoff, AccumulatedContext, ContextCategory, Contribution, HandoffRecord,
    HandoffStrategy,
};
pub use loop_engine::{LoopConfig, LoopController, LoopIteration, LoopReport, LoopStatusReport};
pub use phases::{
    complexity_score, create_wave_plan, select_strategy, FailureHandling, OperationProfile,
    WavePhase, WavePlan, WaveStrategy,
};
pub use recovery::{
    choose_chain_recovery, choose_wave_recovery, classify_failure, classify_phase_failure,
    ChainRecovery, FailureProfile, WaveRecovery,
};
pub use resource::{
    PressureReport, ResourceAllocation, ResourceManager, ResourceRequirements,
};
pub use wave::{
    ParticipantResult, WaveEngine, WaveOptions, WavePhaseResult, WaveReport, WaveRollbackReport,
    WaveStatusReport,
};
