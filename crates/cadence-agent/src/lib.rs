//! # cadence-agent
//!
//! Sub-agent layer for the Cadence orchestration kernel:
//! - Specialization templates and keyword inference
//! - Sub-agent manager (create, track, release)
//! - Pluggable work strategies (persona execution, sub-task execution,
//!   loop improvement) with deterministic defaults

mod manager;
mod simulator;
mod task;
mod templates;

pub use manager::{SubAgent, SubAgentManager};
pub use simulator::{
    DeterministicSimulator, DeterministicWorker, GrowthImprovement, ImprovementFunction,
    PersonaWorker, WorkOutput, WorkSimulator,
};
pub use task::SubTask;
pub use templates::{
    infer_specialization, Specialization, SpecializationTemplate, TemplateRegistry,
};
