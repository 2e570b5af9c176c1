//! # cadence-core
//!
//! Core types for the Cadence orchestration kernel:
//! - Shared data model (statuses, priorities, findings, scope items)
//! - Unified error type
//! - Execution context snapshots and the context-preservation seam
//! - Injectable ID generation
//! - TOML-backed configuration with every engine threshold

mod config;
mod context;
mod error;
mod id;
mod types;

pub use config::{
    CadenceConfig, ChainDefaults, CheckpointRetention, DelegationDefaults, LoopDefaults,
    ResourceDefaults, WaveDefaults,
};
pub use context::{ContextPreserver, ExecutionContext, InMemoryPreserver};
pub use error::{CadenceError, Result};
pub use id::{IdGenerator, SequentialIds, UuidIds};
pub use types::{
    AgentStatus, DelegationStatus, ExecutionKind, Finding, LoopMode, Priority, RunStatus,
    ScopeItem, Severity, WaveStatus,
};
