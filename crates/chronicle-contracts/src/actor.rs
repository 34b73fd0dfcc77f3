//! Actor identity types.
//!
//! Every chronicle entry names who produced it.  The chronicle does not
//! interpret actors beyond recording them; they exist for audit queries.

use serde::{Deserialize, Serialize};

/// Stable, human-readable identifier for a kind of agent.
///
/// Example: `AgentType("planner")`, `AgentType("executor")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(pub String);

/// Identifier for one running agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new, unique agent instance id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Who produced an event: `{ agentType, agentId }` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub agent_type: AgentType,
    pub agent_id: AgentId,
}

impl Actor {
    pub fn new(agent_type: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            agent_type: AgentType(agent_type.into()),
            agent_id: AgentId(agent_id.into()),
        }
    }

    /// An actor of the given type with a freshly generated instance id.
    pub fn spawn(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: AgentType(agent_type.into()),
            agent_id: AgentId::generate(),
        }
    }
}
