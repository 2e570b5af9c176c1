//! Delegation sub-task description

use cadence_core::{Priority, ScopeItem};
use serde::{Deserialize, Serialize};

use crate::templates::Specialization;

/// One unit of decomposed delegation work, handled by one sub-agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub sub_task_id: String,
    pub description: String,
    /// Scope items this sub-task covers
    pub scope: Vec<ScopeItem>,
    pub priority: Priority,
    pub specialization: Specialization,
}

impl SubTask {
    pub fn new(
        sub_task_id: impl Into<String>,
        description: impl Into<String>,
        scope: Vec<ScopeItem>,
    ) -> Self {
        Self {
            sub_task_id: sub_task_id.into(),
            description: description.into(),
            scope,
            priority: Priority::Medium,
            specialization: Specialization::Quality,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        self.specialization = specialization;
        self
    }
}
