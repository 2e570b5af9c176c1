//! Injectable ID generation
//!
//! Engines never call UUID generation inline; they take an [`IdGenerator`]
//! so tests can supply deterministic IDs.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generates opaque execution identifiers
pub trait IdGenerator: Send + Sync {
    /// Produce the next ID with the given prefix ("wave", "loop", ...)
    fn next(&self, prefix: &str) -> String;
}

/// UUID-backed generator used in production
#[derive(Debug, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8])
    }
}

/// Sequential generator for deterministic tests
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", prefix, n)
    }
}
