//! Unified error types for Cadence

use thiserror::Error;

/// Unified error type for all Cadence operations
#[derive(Error, Debug)]
pub enum CadenceError {
    // Validation errors are raised before any state mutation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution not found: {0}")]
    NotFound(String),

    #[error("Duplicate execution ID: {0}")]
    DuplicateId(String),

    // Wave errors
    #[error("Wave error: {0}")]
    Wave(String),

    #[error("Phase failed: {0}")]
    PhaseFailed(String),

    // Loop errors
    #[error("Loop error: {0}")]
    Loop(String),

    // Chain errors
    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Handoff error: {0}")]
    Handoff(String),

    // Delegation errors
    #[error("Delegation error: {0}")]
    Delegation(String),

    // Resource errors
    #[error("Resource error: {0}")]
    Resource(String),

    // Checkpoint errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    // Agent errors
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using CadenceError
pub type Result<T> = std::result::Result<T, CadenceError>;
