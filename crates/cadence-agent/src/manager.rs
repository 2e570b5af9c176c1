//! Sub-agent creation and tracking
//!
//! One sub-agent per delegation sub-task, instantiated from a
//! specialization template and released back to idle after use.

use cadence_core::{AgentStatus, CadenceError, IdGenerator, Result, ScopeItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::task::SubTask;
use crate::templates::{Specialization, TemplateRegistry};

/// A specialized worker instantiated for one delegation sub-task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgent {
    pub agent_id: String,
    pub specialization: Specialization,
    pub persona: String,
    pub tools: Vec<String>,
    pub focus: Vec<String>,
    /// Scope items the agent is assigned
    pub scope: Vec<ScopeItem>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

/// Creates and tracks sub-agents from the template registry
pub struct SubAgentManager {
    registry: TemplateRegistry,
    ids: Arc<dyn IdGenerator>,
    agents: Arc<RwLock<HashMap<String, SubAgent>>>,
}

impl SubAgentManager {
    pub fn new(registry: TemplateRegistry, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            registry,
            ids,
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Instantiate a sub-agent for a sub-task from its specialization template
    pub async fn create_agent(&self, task: &SubTask) -> Result<SubAgent> {
        let template = self.registry.get(task.specialization).ok_or_else(|| {
            CadenceError::Agent(format!(
                "No template registered for specialization {}",
                task.specialization
            ))
        })?;

        let agent = SubAgent {
            agent_id: self.ids.next("agent"),
            specialization: template.specialization,
            persona: template.persona.clone(),
            tools: template.tools.clone(),
            focus: template.focus.clone(),
            scope: task.scope.clone(),
            status: AgentStatus::Idle,
            created_at: Utc::now(),
        };

        debug!(
            "Created agent {} ({}) for sub-task {}",
            agent.agent_id, agent.persona, task.sub_task_id
        );

        self.agents
            .write()
            .await
            .insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    /// Update an agent's lifecycle status
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| CadenceError::AgentNotFound(agent_id.to_string()))?;
        agent.status = status;
        Ok(())
    }

    /// Release an agent back to idle after its sub-task completes
    pub async fn release(&self, agent_id: &str) -> Result<()> {
        self.set_status(agent_id, AgentStatus::Idle).await
    }

    pub async fn get(&self, agent_id: &str) -> Option<SubAgent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.status == AgentStatus::Running)
            .count()
    }

    pub async fn total_count(&self) -> usize {
        self.agents.read().await.len()
    }
}
