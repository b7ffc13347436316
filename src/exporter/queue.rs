//! Admission queue and agent selection

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use super::state::AgentExportState;
use crate::Agent;

/// An agent waiting for an export slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedAgent {
    /// Never admitted; its interval is planned on admission
    Fresh(Agent),
    /// Previously active, with the rest of its interval still to export
    Continuing {
        /// Agent identifier
        agent_id: String,
        /// Start of the next window
        next_start: DateTime<Utc>,
        /// End of the agent's interval
        final_end: DateTime<Utc>,
        /// Windows already submitted for this agent
        windows_submitted: u32,
    },
    /// Restored from a checkpoint with its export task still outstanding
    Resumed(AgentExportState),
}

impl QueuedAgent {
    /// Identifier of the queued agent
    pub fn agent_id(&self) -> &str {
        match self {
            QueuedAgent::Fresh(agent) => &agent.agent_id,
            QueuedAgent::Continuing { agent_id, .. } => agent_id,
            QueuedAgent::Resumed(state) => &state.agent_id,
        }
    }
}

/// FIFO of agents awaiting admission, with push-to-front for requeues
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    entries: VecDeque<QueuedAgent>,
}

impl AdmissionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the back
    pub fn push_back(&mut self, entry: QueuedAgent) {
        self.entries.push_back(entry);
    }

    /// Put an entry back at the front so it is admitted next
    pub fn requeue_front(&mut self, entry: QueuedAgent) {
        self.entries.push_front(entry);
    }

    /// Take the next entry
    pub fn pop_front(&mut self) -> Option<QueuedAgent> {
        self.entries.pop_front()
    }

    /// Next entry without removing it
    pub fn peek(&self) -> Option<&QueuedAgent> {
        self.entries.front()
    }

    /// Number of waiting entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no agent is waiting
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `agent_id` is waiting
    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries.iter().any(|e| e.agent_id() == agent_id)
    }

    /// Iterate over waiting entries in admission order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedAgent> {
        self.entries.iter()
    }
}

/// Chooses which listed agents are exported
#[derive(Debug, Clone, Default)]
pub struct AgentSelector {
    allow_list: Option<HashSet<String>>,
}

impl AgentSelector {
    /// Select every non-connector agent
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict selection to the given agent ids; an empty list selects all
    pub fn with_allow_list<I, S>(mut self, agent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: HashSet<String> = agent_ids.into_iter().map(Into::into).collect();
        self.allow_list = if ids.is_empty() { None } else { Some(ids) };
        self
    }

    /// Whether `agent` should be exported
    pub fn accepts(&self, agent: &Agent) -> bool {
        if agent.is_connector() {
            return false;
        }
        match &self.allow_list {
            Some(ids) => ids.contains(&agent.agent_id),
            None => true,
        }
    }

    /// Filter `agents`, keeping listing order and dropping invalid or repeated ids
    pub fn select(&self, agents: Vec<Agent>) -> Vec<Agent> {
        let mut seen = HashSet::new();
        agents
            .into_iter()
            .filter(|agent| {
                if let Err(e) = agent.validate() {
                    warn!("Skipping invalid agent: {}", e);
                    return false;
                }
                if !self.accepts(agent) {
                    debug!(agent_id = %agent.agent_id, agent_type = %agent.agent_type, "Agent not selected");
                    return false;
                }
                seen.insert(agent.agent_id.clone())
            })
            .collect()
    }
}
