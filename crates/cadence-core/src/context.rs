//! Execution context and context preservation
//!
//! An [`ExecutionContext`] is an immutable snapshot per engine step. Engines
//! never mutate a context in place; each phase, iteration, or link derives a
//! new copy that carries forward.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{CadenceError, Result, ScopeItem};

/// Immutable snapshot of an operation's inputs at one engine step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Opaque execution identifier
    pub execution_id: String,
    /// Operation description ("improve", "analyze security", ...)
    pub command: String,
    /// Free-form flags supplied by the caller
    pub flags: HashMap<String, Value>,
    /// File-like items in scope
    pub scope: Vec<ScopeItem>,
    /// Accumulated outputs and annotations
    pub metadata: HashMap<String, Value>,
    /// When this snapshot was taken
    pub timestamp: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            command: command.into(),
            flags: HashMap::new(),
            scope: Vec::new(),
            metadata: HashMap::new(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_scope(mut self, scope: Vec<ScopeItem>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.flags.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Derive the snapshot for the next engine step, merging `outputs`
    /// into metadata. The original snapshot is left untouched.
    pub fn derive(&self, outputs: &HashMap<String, Value>) -> Self {
        let mut next = self.clone();
        for (key, value) in outputs {
            next.metadata.insert(key.clone(), value.clone());
        }
        next.timestamp = Some(Utc::now());
        next
    }
}

/// Contract for audit/resume snapshots of execution context.
///
/// Failures are non-fatal to the calling engine; callers log and continue.
#[async_trait]
pub trait ContextPreserver: Send + Sync {
    /// Store a snapshot, returning its ID
    async fn preserve_context(
        &self,
        execution_id: &str,
        context: &ExecutionContext,
        metadata: HashMap<String, Value>,
    ) -> Result<String>;

    /// Restore a previously stored snapshot
    async fn restore_context(&self, snapshot_id: &str) -> Result<ExecutionContext>;
}

/// In-memory context preserver, suitable for tests and single-process use
#[derive(Default)]
pub struct InMemoryPreserver {
    snapshots: Arc<RwLock<HashMap<String, ExecutionContext>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryPreserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl ContextPreserver for InMemoryPreserver {
    async fn preserve_context(
        &self,
        execution_id: &str,
        context: &ExecutionContext,
        _metadata: HashMap<String, Value>,
    ) -> Result<String> {
        let seq = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let snapshot_id = format!("snap-{}-{}", execution_id, seq);
        self.snapshots
            .write()
            .await
            .insert(snapshot_id.clone(), context.clone());
        Ok(snapshot_id)
    }

    async fn restore_context(&self, snapshot_id: &str) -> Result<ExecutionContext> {
        self.snapshots
            .read()
            .await
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| CadenceError::NotFound(format!("snapshot {}", snapshot_id)))
    }
}
